//! Sequence-ordered leader latch
//!
//! Every candidate owns one ephemeral sequential node under the election
//! scope. The candidate whose session owns the lowest-numbered node is the
//! leader. The latch never creates nodes itself; it only watches the scope
//! and re-evaluates on node changes and connection state changes:
//!
//! - SUSPENDED / LOST: leadership is dropped immediately
//! - CONNECTED / RECONNECTED: leadership is re-evaluated
//! - any change under the scope: leadership is re-evaluated

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{ConnectionState, CoordinationClient, NodeEvent};
use crate::error::{CoordError, Result};
use crate::primitive::{ElectionPrimitive, LeadershipListener};
use crate::scope::ElectionScope;

/// One candidacy node as seen by [`LeaderLatch::participants`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub path: String,
    pub is_leader: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchState {
    Latent,
    Started,
    Closed,
}

struct LatchCore {
    client: Arc<dyn CoordinationClient>,
    scope: ElectionScope,
    id: String,
    leader: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn LeadershipListener>>>,
}

impl LatchCore {
    async fn evaluate(&self) -> Result<bool> {
        let children = match self.client.children(self.scope.path()).await {
            Ok(children) => children,
            Err(CoordError::NoNode(_)) => Vec::new(),
            Err(err) => return Err(err),
        };
        let Some(session) = self.client.session_id() else {
            return Ok(false);
        };

        for child in ElectionScope::ballot_order(children) {
            match self.client.stat(&self.scope.child_path(&child)).await {
                Ok(stat) => return Ok(stat.ephemeral_owner == Some(session)),
                // removed between listing and stat
                Err(CoordError::NoNode(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }

    fn set_leadership(&self, leader: bool) {
        if self.leader.swap(leader, Ordering::SeqCst) == leader {
            return;
        }

        let listeners = self.listeners.read().clone();
        if leader {
            info!(candidate = %self.id, scope = %self.scope, "Leadership acquired");
            for listener in listeners {
                listener.on_leadership_acquired();
            }
        } else {
            info!(candidate = %self.id, scope = %self.scope, "Leadership lost");
            for listener in listeners {
                listener.on_leadership_lost();
            }
        }
    }

    async fn refresh(&self) {
        match self.evaluate().await {
            Ok(leader) => self.set_leadership(leader),
            Err(err) => {
                warn!(candidate = %self.id, error = %err, "Leadership evaluation failed");
                self.set_leadership(false);
            }
        }
    }

    async fn watch(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut states: broadcast::Receiver<ConnectionState>,
        mut events: broadcast::Receiver<NodeEvent>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Ok(event) if event.parent() == self.scope.path() => {
                        debug!(
                            candidate = %self.id,
                            path = %event.path,
                            kind = ?event.kind,
                            "Scope changed"
                        );
                        self.refresh().await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(candidate = %self.id, skipped, "Node events lagged");
                        self.refresh().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                state = states.recv() => match state {
                    Ok(ConnectionState::Suspended | ConnectionState::Lost) => {
                        self.set_leadership(false);
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => self.refresh().await,
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!(candidate = %self.id, "Latch watch stopped");
    }
}

/// Leader latch over an [`ElectionScope`]
pub struct LeaderLatch {
    core: Arc<LatchCore>,
    state: Mutex<LatchState>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderLatch {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        scope: ElectionScope,
        id: impl Into<String>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            core: Arc::new(LatchCore {
                client,
                scope,
                id: id.into(),
                leader: AtomicBool::new(false),
                listeners: RwLock::new(Vec::new()),
            }),
            state: Mutex::new(LatchState::Latent),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn scope(&self) -> &ElectionScope {
        &self.core.scope
    }

    /// Every candidacy node in ballot order; the first one leads
    pub async fn participants(&self) -> Result<Vec<Participant>> {
        let scope = &self.core.scope;
        let children = match self.core.client.children(scope.path()).await {
            Ok(children) => children,
            Err(CoordError::NoNode(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut participants = Vec::new();
        for child in ElectionScope::ballot_order(children) {
            let path = scope.child_path(&child);
            let data = match self.core.client.get_data(&path).await {
                Ok(data) => data,
                Err(CoordError::NoNode(_)) => continue,
                Err(err) => return Err(err),
            };
            participants.push(Participant {
                id: String::from_utf8_lossy(&data).into_owned(),
                is_leader: participants.is_empty(),
                path,
            });
        }
        Ok(participants)
    }

    /// Current leader of the scope, if any
    pub async fn leader(&self) -> Result<Option<Participant>> {
        Ok(self.participants().await?.into_iter().next())
    }
}

#[async_trait]
impl ElectionPrimitive for LeaderLatch {
    async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                LatchState::Latent => *state = LatchState::Started,
                LatchState::Started => {
                    return Err(CoordError::IllegalState("latch already started".to_string()))
                }
                LatchState::Closed => {
                    return Err(CoordError::IllegalState("latch is closed".to_string()))
                }
            }
        }

        // Subscribe before the first evaluation so no change slips between them
        let states = self.core.client.subscribe();
        let events = self.core.client.node_events();

        match self.core.evaluate().await {
            Ok(leader) => self.core.set_leadership(leader),
            Err(err) => {
                *self.state.lock() = LatchState::Latent;
                return Err(err);
            }
        }

        let task = tokio::spawn(Arc::clone(&self.core).watch(
            self.shutdown_tx.subscribe(),
            states,
            events,
        ));
        *self.task.lock() = Some(task);

        info!(candidate = %self.core.id, scope = %self.core.scope, "Leader latch started");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), LatchState::Closed);
        match previous {
            LatchState::Latent => Ok(()),
            LatchState::Closed => Err(CoordError::IllegalState("latch already closed".to_string())),
            LatchState::Started => {
                self.shutdown_tx.send_replace(true);
                let task = self.task.lock().take();
                if let Some(task) = task {
                    task.abort();
                    let _ = task.await;
                }
                self.core.leader.store(false, Ordering::SeqCst);
                info!(candidate = %self.core.id, scope = %self.core.scope, "Leader latch closed");
                Ok(())
            }
        }
    }

    fn add_listener(&self, listener: Arc<dyn LeadershipListener>) {
        self.core.listeners.write().push(listener);
    }

    fn has_leadership(&self) -> bool {
        self.core.leader.load(Ordering::SeqCst)
    }
}

impl Drop for LeaderLatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
