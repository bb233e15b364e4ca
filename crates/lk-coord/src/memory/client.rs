//! Client side of the in-process ensemble
//!
//! Tracks the link to the ensemble (connected, suspended, disconnected) and
//! turns link changes into [`ConnectionState`] notifications:
//!
//! - a request that finds the ensemble unavailable suspends the link
//! - a suspension that outlives the session timeout expires the session (LOST)
//! - a request on a suspended link with a live session resumes it (RECONNECTED)
//! - a request with no session opens a new one (CONNECTED the first time,
//!   RECONNECTED afterwards)
//!
//! Sessions are opened lazily, so node operations work before `start()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::MemoryEnsemble;
use crate::client::{
    ClientOptions, ConnectString, ConnectionState, CoordinationClient, CreateMode, NodeEvent,
    NodeStat,
};
use crate::error::{CoordError, Result};

const STATE_CAPACITY: usize = 64;
const LINK_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Disconnected,
    Connected,
    Suspended,
}

struct ClientInner {
    ensemble: MemoryEnsemble,
    connect_string: ConnectString,
    options: ClientOptions,
    session: Mutex<Option<i64>>,
    link: watch::Sender<Link>,
    states: broadcast::Sender<ConnectionState>,
    ever_connected: AtomicBool,
    started: AtomicBool,
    closed: AtomicBool,
}

impl ClientInner {
    fn link(&self) -> Link {
        *self.link.borrow()
    }

    fn emit(&self, state: ConnectionState) {
        debug!(connect_string = %self.connect_string, %state, "Connection state changed");
        let _ = self.states.send(state);
    }

    /// Session for the next request, moving the link state machine as needed
    fn current(self: &Arc<Self>) -> Result<i64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoordError::Closed);
        }

        match self.link() {
            Link::Disconnected => self.establish(),
            Link::Suspended => self.resume(),
            Link::Connected => {
                if !self.ensemble.is_available() {
                    self.suspend();
                    return Err(CoordError::ConnectionLoss);
                }
                let id = (*self.session.lock()).ok_or(CoordError::ConnectionLoss)?;
                if self.ensemble.session_alive(id) {
                    Ok(id)
                } else {
                    self.lose(id);
                    Err(CoordError::SessionExpired)
                }
            }
        }
    }

    fn establish(&self) -> Result<i64> {
        let mut session = self.session.lock();
        if let (Some(id), Link::Connected) = (*session, self.link()) {
            return Ok(id);
        }

        let id = self.ensemble.open_session()?;
        *session = Some(id);
        self.link.send_replace(Link::Connected);
        if self.ever_connected.swap(true, Ordering::SeqCst) {
            self.emit(ConnectionState::Reconnected);
        } else {
            self.emit(ConnectionState::Connected);
        }

        info!(session = id, connect_string = %self.connect_string, "Session established");
        Ok(id)
    }

    fn resume(&self) -> Result<i64> {
        if !self.ensemble.is_available() {
            return Err(CoordError::ConnectionLoss);
        }

        let session = self.session.lock();
        let current = *session;
        match current {
            Some(id) if self.ensemble.session_alive(id) => {
                if self.link() != Link::Connected {
                    self.link.send_replace(Link::Connected);
                    self.emit(ConnectionState::Reconnected);
                    info!(session = id, "Connection resumed");
                }
                Ok(id)
            }
            Some(id) => {
                drop(session);
                self.lose(id);
                Err(CoordError::SessionExpired)
            }
            None => {
                drop(session);
                self.establish()
            }
        }
    }

    fn suspend(self: &Arc<Self>) {
        let id = {
            let session = self.session.lock();
            if self.link() != Link::Connected {
                return;
            }
            self.link.send_replace(Link::Suspended);
            self.emit(ConnectionState::Suspended);
            *session
        };
        warn!(connect_string = %self.connect_string, session = ?id, "Connection suspended");

        // A suspension that outlives the session timeout ends the session
        let (Some(id), Ok(runtime)) = (id, tokio::runtime::Handle::try_current()) else {
            return;
        };
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            tokio::time::sleep(inner.options.session_timeout).await;
            let still_suspended =
                inner.link() == Link::Suspended && *inner.session.lock() == Some(id);
            if still_suspended {
                inner.ensemble.close_session(id);
                inner.lose(id);
            }
        });
    }

    fn lose(&self, id: i64) {
        let mut session = self.session.lock();
        if *session != Some(id) {
            return;
        }
        *session = None;
        self.link.send_replace(Link::Disconnected);
        self.emit(ConnectionState::Lost);
        warn!(session = id, connect_string = %self.connect_string, "Session lost");
    }

    fn observe<T>(self: &Arc<Self>, id: i64, result: &Result<T>) {
        match result {
            Err(CoordError::ConnectionLoss) => self.suspend(),
            Err(CoordError::SessionExpired) => self.lose(id),
            _ => {}
        }
    }

    /// Run `op` against the current session, retrying connection-level
    /// failures with the client's backoff policy
    async fn call<T, F>(self: &Arc<Self>, op: F) -> Result<T>
    where
        F: Fn(i64) -> Result<T> + Send,
    {
        let retry = self.options.retry;
        let mut attempt = 0;
        loop {
            let result = self.current().and_then(|id| {
                let result = op(id);
                self.observe(id, &result);
                result
            });

            match result {
                Err(err) if err.is_retryable() && attempt < retry.max_retries => {
                    let backoff = retry.backoff(attempt);
                    debug!(attempt, ?backoff, error = %err, "Retrying coordination request");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Client of a [`MemoryEnsemble`]
#[derive(Clone)]
pub struct MemoryClient {
    inner: Arc<ClientInner>,
}

impl MemoryClient {
    pub(super) fn new(
        ensemble: MemoryEnsemble,
        connect_string: ConnectString,
        options: ClientOptions,
    ) -> Self {
        let (link, _) = watch::channel(Link::Disconnected);
        let (states, _) = broadcast::channel(STATE_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                ensemble,
                connect_string,
                options,
                session: Mutex::new(None),
                link,
                states,
                ever_connected: AtomicBool::new(false),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn connect_string(&self) -> &ConnectString {
        &self.inner.connect_string
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Drop the connection while keeping the session (SUSPENDED)
    pub fn suspend(&self) {
        self.inner.suspend();
    }

    /// Re-attach a suspended connection (RECONNECTED, or LOST if the session
    /// did not survive)
    pub fn resume(&self) -> Result<()> {
        self.inner.resume().map(|_| ())
    }

    /// Expire the session on the ensemble side (LOST)
    pub fn expire_session(&self) {
        let id = *self.inner.session.lock();
        if let Some(id) = id {
            self.inner.ensemble.close_session(id);
            self.inner.lose(id);
        }
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    async fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CoordError::Closed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoordError::IllegalState("client already started".to_string()));
        }

        match self.inner.call(Ok).await {
            Ok(session) => {
                info!(
                    session,
                    connect_string = %self.inner.connect_string,
                    "Coordination client started"
                );
                Ok(())
            }
            Err(err) => {
                self.inner.started.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn create(&self, path: &str, mode: CreateMode, data: &[u8]) -> Result<String> {
        let ensemble = &self.inner.ensemble;
        self.inner
            .call(|session| ensemble.create(session, path, mode, data))
            .await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let ensemble = &self.inner.ensemble;
        self.inner.call(|session| ensemble.children(session, path)).await
    }

    async fn stat(&self, path: &str) -> Result<NodeStat> {
        let ensemble = &self.inner.ensemble;
        self.inner.call(|session| ensemble.stat(session, path)).await
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        let ensemble = &self.inner.ensemble;
        self.inner.call(|session| ensemble.get_data(session, path)).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let ensemble = &self.inner.ensemble;
        self.inner.call(|session| ensemble.delete(session, path)).await
    }

    fn session_id(&self) -> Option<i64> {
        *self.inner.session.lock()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.states.subscribe()
    }

    fn node_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.ensemble.subscribe_events()
    }

    async fn block_until_connected_or_timed_out(&self) -> bool {
        let inner = &self.inner;
        let wait = async {
            let mut link = inner.link.subscribe();
            loop {
                if inner.closed.load(Ordering::SeqCst) {
                    return false;
                }
                if inner.current().is_ok() {
                    return true;
                }
                tokio::select! {
                    changed = link.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                    }
                    _ = tokio::time::sleep(LINK_POLL_INTERVAL) => {}
                }
            }
        };

        tokio::time::timeout(inner.options.connection_timeout, wait)
            .await
            .unwrap_or(false)
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let session = self.inner.session.lock().take();
        self.inner.link.send_replace(Link::Disconnected);
        if let Some(id) = session {
            self.inner.ensemble.close_session(id);
        }

        info!(
            connect_string = %self.inner.connect_string,
            session = ?session,
            "Coordination client closed"
        );
        Ok(())
    }
}
