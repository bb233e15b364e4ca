//! Leader latch behaviour against the in-process ensemble

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use lk_coord::{
    ClientOptions, CoordError, CoordinationClient, CreateMode, ElectionPrimitive, ElectionScope,
    LeaderLatch, LeadershipListener, LeadershipStatus, MemoryClient, MemoryEnsemble,
    StatusListener,
};

struct Candidate {
    client: MemoryClient,
    latch: LeaderLatch,
    status: Arc<StatusListener>,
}

async fn candidate(ensemble: &MemoryEnsemble, scope: &ElectionScope, id: &str) -> Candidate {
    let client = ensemble.client("127.0.0.1:2181", ClientOptions::default()).unwrap();
    client.start().await.unwrap();
    client
        .create(&scope.candidate_prefix(), CreateMode::EphemeralSequential, id.as_bytes())
        .await
        .unwrap();

    let latch = LeaderLatch::new(Arc::new(client.clone()), scope.clone(), id);
    let status = Arc::new(StatusListener::new(id));
    latch.add_listener(status.clone());
    latch.start().await.unwrap();

    Candidate {
        client,
        latch,
        status,
    }
}

async fn wait_for(rx: &mut watch::Receiver<LeadershipStatus>, want: LeadershipStatus) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|status| *status == want))
        .await
        .expect("timed out waiting for leadership status")
        .unwrap();
}

#[derive(Default)]
struct CountingListener {
    acquired: AtomicU32,
    lost: AtomicU32,
}

impl LeadershipListener for CountingListener {
    fn on_leadership_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn on_leadership_lost(&self) {
        self.lost.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_lowest_sequence_leads() {
    lk_common::init_test_logging();
    let ensemble = MemoryEnsemble::new();
    let scope = ElectionScope::new("latch").unwrap();

    let first = candidate(&ensemble, &scope, "first").await;
    let second = candidate(&ensemble, &scope, "second").await;

    assert!(first.latch.has_leadership());
    assert!(!second.latch.has_leadership());
    assert_eq!(first.status.status(), LeadershipStatus::Leader);

    let participants = second.latch.participants().await.unwrap();
    assert_eq!(participants.len(), 2);
    assert_eq!(participants[0].id, "first");
    assert!(participants[0].is_leader);
    assert_eq!(participants[1].id, "second");
    assert!(!participants[1].is_leader);

    let leader = first.latch.leader().await.unwrap().unwrap();
    assert_eq!(leader.id, "first");
}

#[tokio::test]
async fn test_leadership_moves_when_leader_session_ends() {
    let ensemble = MemoryEnsemble::new();
    let scope = ElectionScope::new("failover").unwrap();

    let first = candidate(&ensemble, &scope, "first").await;
    let second = candidate(&ensemble, &scope, "second").await;
    let mut second_rx = second.status.subscribe();

    first.latch.close().await.unwrap();
    first.client.close().await.unwrap();

    wait_for(&mut second_rx, LeadershipStatus::Leader).await;
    assert!(second.latch.has_leadership());
    assert!(!first.latch.has_leadership());
}

#[tokio::test]
async fn test_suspension_drops_leadership_until_resumed() {
    let ensemble = MemoryEnsemble::new();
    let scope = ElectionScope::new("suspend").unwrap();

    let only = candidate(&ensemble, &scope, "only").await;
    let mut rx = only.status.subscribe();
    assert!(only.latch.has_leadership());

    only.client.suspend();
    wait_for(&mut rx, LeadershipStatus::Follower).await;

    only.client.resume().unwrap();
    wait_for(&mut rx, LeadershipStatus::Leader).await;
}

#[tokio::test]
async fn test_lost_session_is_not_leader_until_new_candidacy() {
    let ensemble = MemoryEnsemble::new();
    let scope = ElectionScope::new("lost").unwrap();

    let only = candidate(&ensemble, &scope, "only").await;
    let counts = Arc::new(CountingListener::default());
    only.latch.add_listener(counts.clone());
    let mut rx = only.status.subscribe();

    only.client.expire_session();
    wait_for(&mut rx, LeadershipStatus::Follower).await;

    // a new session without a candidacy node does not lead
    assert!(only.client.block_until_connected_or_timed_out().await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!only.latch.has_leadership());

    only.client
        .create(&scope.candidate_prefix(), CreateMode::EphemeralSequential, b"only")
        .await
        .unwrap();
    wait_for(&mut rx, LeadershipStatus::Leader).await;

    assert_eq!(counts.lost.load(Ordering::SeqCst), 1);
    assert_eq!(counts.acquired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_latch_lifecycle_errors() {
    let ensemble = MemoryEnsemble::new();
    let scope = ElectionScope::new("lifecycle").unwrap();
    let client = ensemble.client("127.0.0.1:2181", ClientOptions::default()).unwrap();
    let latch = LeaderLatch::new(Arc::new(client), scope, "x");

    // no candidacy nodes at all: started, not leader
    latch.start().await.unwrap();
    assert!(!latch.has_leadership());
    assert!(matches!(latch.start().await, Err(CoordError::IllegalState(_))));

    latch.close().await.unwrap();
    assert!(matches!(latch.close().await, Err(CoordError::IllegalState(_))));
    assert!(matches!(latch.start().await, Err(CoordError::IllegalState(_))));
}

#[tokio::test]
async fn test_close_does_not_notify_listeners() {
    let ensemble = MemoryEnsemble::new();
    let scope = ElectionScope::new("quiet").unwrap();
    let only = candidate(&ensemble, &scope, "only").await;
    let counts = Arc::new(CountingListener::default());
    only.latch.add_listener(counts.clone());

    only.latch.close().await.unwrap();
    assert!(!only.latch.has_leadership());
    assert_eq!(only.status.status(), LeadershipStatus::Leader);
    assert_eq!(counts.lost.load(Ordering::SeqCst), 0);
}
