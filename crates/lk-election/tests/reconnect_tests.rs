//! Candidacy repair after connection state changes

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, FlakyClient, RecordingListener};
use lk_coord::{
    ClientOptions, CoordinationClient, ElectionPrimitive, ElectionScope, LeaderLatch,
    MemoryEnsemble,
};
use lk_election::{ElectionService, ElectionSettings};

struct Harness {
    ensemble: MemoryEnsemble,
    client: Arc<FlakyClient>,
    listener: Arc<RecordingListener>,
    service: ElectionService,
}

async fn active_service(scene: &str) -> Harness {
    let ensemble = MemoryEnsemble::new();
    let client =
        FlakyClient::new(ensemble.client("127.0.0.1:2181", ClientOptions::default()).unwrap());
    let scope = ElectionScope::new(scene).unwrap();

    let latch = LeaderLatch::new(client.clone(), scope, "me");
    let listener = RecordingListener::new();
    latch.add_listener(listener.clone());

    let settings = ElectionSettings::new("127.0.0.1:2181", scene).with_candidate_id("me");
    let service = ElectionService::with_parts(client.clone(), Arc::new(latch), settings).unwrap();
    service.wait_until_active().await.unwrap();
    eventually(Duration::from_secs(10), || service.has_leadership()).await;

    Harness {
        ensemble,
        client,
        listener,
        service,
    }
}

async fn live_candidates(harness: &Harness) -> usize {
    let observer = harness
        .ensemble
        .client("127.0.0.1:2181", ClientOptions::default())
        .unwrap();
    let count = observer
        .children(harness.service.scope().path())
        .await
        .unwrap()
        .len();
    observer.close().await.unwrap();
    count
}

#[tokio::test(start_paused = true)]
async fn test_suspension_without_loss_causes_no_repair() {
    lk_common::init_test_logging();
    let harness = active_service("no-repair").await;
    let before = harness.service.candidacy_path();

    harness.client.inner().suspend();
    tokio::time::sleep(Duration::from_secs(5)).await;
    harness.client.inner().resume().unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(harness.client.creates(), 1);
    assert_eq!(harness.service.candidacy_path(), before);
    assert_eq!(live_candidates(&harness).await, 1);
    assert!(harness.service.has_leadership());

    harness.service.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_is_repaired_once_despite_failures() {
    let harness = active_service("repair").await;
    let before = harness.service.candidacy_path().unwrap();

    harness.client.fail_next_creates(2);
    harness.client.inner().expire_session();

    eventually(Duration::from_secs(60), || harness.client.creates() == 2).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(harness.client.creates(), 2);
    assert_eq!(live_candidates(&harness).await, 1);
    let after = harness.service.candidacy_path().unwrap();
    assert_ne!(after, before);

    harness.service.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_suspended_lost_reconnected_moves_candidacy_and_leadership() {
    let harness = active_service("cycle").await;
    let before = harness.service.candidacy_path().unwrap();
    let session_before = harness.client.session_id();

    harness.client.inner().suspend();
    harness.client.inner().expire_session();

    eventually(Duration::from_secs(60), || {
        harness.service.has_leadership()
            && harness.service.candidacy_path().as_deref() != Some(before.as_str())
    })
    .await;

    assert_ne!(harness.client.session_id(), session_before);
    assert_eq!(harness.listener.events(), vec!["acquired", "lost", "acquired"]);
    assert_eq!(live_candidates(&harness).await, 1);

    harness.service.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_lagged_notifications_recheck_without_recreating() {
    let harness = active_service("lagged").await;

    // park the repair inside its create
    harness.client.hold_creates();
    harness.client.inner().expire_session();
    eventually(Duration::from_secs(10), || harness.client.held_creates() == 1).await;

    // overflow the handler's subscription while it is busy
    for _ in 0..40 {
        harness.client.inner().suspend();
        harness.client.inner().resume().unwrap();
    }

    harness.client.release_creates();
    eventually(Duration::from_secs(10), || harness.client.creates() == 2).await;
    let repaired = harness.service.candidacy_path();

    // the lag pass finds the repaired node and leaves it alone
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.client.creates(), 2);
    assert_eq!(harness.service.candidacy_path(), repaired);
    assert_eq!(live_candidates(&harness).await, 1);
    eventually(Duration::from_secs(10), || harness.service.has_leadership()).await;

    harness.service.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_losses_never_leak_nodes() {
    let harness = active_service("repeated").await;

    for round in 0..3 {
        harness.client.inner().expire_session();
        eventually(Duration::from_secs(60), || harness.client.creates() == round + 2).await;
    }

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(live_candidates(&harness).await, 1);
    assert!(harness.service.has_leadership());

    harness.service.close().await;
}
