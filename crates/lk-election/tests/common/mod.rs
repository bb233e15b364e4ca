//! Shared test doubles for election service tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use lk_coord::{
    ConnectionState, CoordError, CoordinationClient, CreateMode, ElectionPrimitive,
    LeadershipListener, MemoryClient, NodeEvent, NodeStat,
};

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Memory client with injectable failures and call counters
pub struct FlakyClient {
    inner: MemoryClient,
    create_failures: AtomicU32,
    start_failures: AtomicU32,
    fail_close: AtomicBool,
    /// Creates wait while this is `false`
    create_gate: watch::Sender<bool>,
    held_creates: AtomicU32,
    creates: AtomicU32,
    starts: AtomicU32,
    closes: AtomicU32,
}

impl FlakyClient {
    pub fn new(inner: MemoryClient) -> Arc<Self> {
        Arc::new(Self {
            inner,
            create_failures: AtomicU32::new(0),
            start_failures: AtomicU32::new(0),
            fail_close: AtomicBool::new(false),
            create_gate: watch::channel(true).0,
            held_creates: AtomicU32::new(0),
            creates: AtomicU32::new(0),
            starts: AtomicU32::new(0),
            closes: AtomicU32::new(0),
        })
    }

    pub fn inner(&self) -> &MemoryClient {
        &self.inner
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.create_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_starts(&self, count: u32) {
        self.start_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Park every create until [`release_creates`](Self::release_creates)
    pub fn hold_creates(&self) {
        self.create_gate.send_replace(false);
    }

    pub fn release_creates(&self) {
        self.create_gate.send_replace(true);
    }

    /// Creates that have waited at the gate
    pub fn held_creates(&self) -> u32 {
        self.held_creates.load(Ordering::SeqCst)
    }

    /// Successful creates
    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Successful starts
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Close calls, failed or not
    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationClient for FlakyClient {
    async fn start(&self) -> lk_coord::Result<()> {
        if take_failure(&self.start_failures) {
            return Err(CoordError::ConnectionLoss);
        }
        self.inner.start().await?;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create(&self, path: &str, mode: CreateMode, data: &[u8]) -> lk_coord::Result<String> {
        if !*self.create_gate.borrow() {
            self.held_creates.fetch_add(1, Ordering::SeqCst);
            let mut gate = self.create_gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;
        }
        if take_failure(&self.create_failures) {
            return Err(CoordError::ConnectionLoss);
        }
        let created = self.inner.create(path, mode, data).await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn children(&self, path: &str) -> lk_coord::Result<Vec<String>> {
        self.inner.children(path).await
    }

    async fn stat(&self, path: &str) -> lk_coord::Result<NodeStat> {
        self.inner.stat(path).await
    }

    async fn get_data(&self, path: &str) -> lk_coord::Result<Vec<u8>> {
        self.inner.get_data(path).await
    }

    async fn delete(&self, path: &str) -> lk_coord::Result<()> {
        self.inner.delete(path).await
    }

    fn session_id(&self) -> Option<i64> {
        self.inner.session_id()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.subscribe()
    }

    fn node_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.node_events()
    }

    async fn block_until_connected_or_timed_out(&self) -> bool {
        self.inner.block_until_connected_or_timed_out().await
    }

    async fn close(&self) -> lk_coord::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await?;
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(CoordError::IllegalState("injected close failure".to_string()));
        }
        Ok(())
    }
}

/// Election primitive that only records what happened to it
#[derive(Default)]
pub struct MockPrimitive {
    start_failures: AtomicU32,
    hang_start: AtomicBool,
    fail_close: AtomicBool,
    started: AtomicBool,
    start_calls: AtomicU32,
    close_calls: AtomicU32,
    listeners: Mutex<Vec<Arc<dyn LeadershipListener>>>,
}

impl MockPrimitive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_starts(&self, count: u32) {
        self.start_failures.store(count, Ordering::SeqCst);
    }

    /// Make `start` never complete
    pub fn hang_start(&self) {
        self.hang_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ElectionPrimitive for MockPrimitive {
    async fn start(&self) -> lk_coord::Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_start.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if take_failure(&self.start_failures) {
            return Err(CoordError::ConnectionLoss);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> lk_coord::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(CoordError::IllegalState("injected close failure".to_string()));
        }
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn LeadershipListener>) {
        self.listeners.lock().push(listener);
    }

    fn has_leadership(&self) -> bool {
        false
    }
}

/// Listener that keeps every notification in order
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }
}

impl LeadershipListener for RecordingListener {
    fn on_leadership_acquired(&self) {
        self.events.lock().push("acquired");
    }

    fn on_leadership_lost(&self) {
        self.events.lock().push("lost");
    }
}

/// Poll `condition` every 50ms until it holds, panicking after `limit`
pub async fn eventually<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
