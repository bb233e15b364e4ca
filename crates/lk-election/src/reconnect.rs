//! Reconnection handler
//!
//! Watches the client's connection states. A LOST session takes its candidacy
//! node with it, so after LOST the handler waits for a session again and
//! re-ensures the node, retrying until it succeeds or shutdown is requested.
//! Repairs run inline: further notifications queue in the subscription until
//! the repair is done.

use std::sync::Arc;

use lk_coord::{ConnectionState, CoordError, CoordinationClient};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::candidacy::Candidacy;
use crate::error::{ElectionError, Result};
use crate::retry::{RetryPolicy, Shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    None,
    RecreateCandidacy,
}

/// Repair needed for a connection state transition. Only LOST ends the
/// session, so only LOST needs a new candidacy node.
pub fn decide(_previous: Option<ConnectionState>, new: ConnectionState) -> RepairAction {
    match new {
        ConnectionState::Lost => RepairAction::RecreateCandidacy,
        ConnectionState::Connected
        | ConnectionState::Suspended
        | ConnectionState::Reconnected
        | ConnectionState::ReadOnly => RepairAction::None,
    }
}

pub(crate) struct ReconnectionHandler {
    pub(crate) client: Arc<dyn CoordinationClient>,
    pub(crate) candidacy: Arc<Candidacy>,
    pub(crate) policy: RetryPolicy,
    pub(crate) states: broadcast::Receiver<ConnectionState>,
    pub(crate) shutdown: Shutdown,
}

impl ReconnectionHandler {
    pub(crate) fn spawn(self, runtime: &tokio::runtime::Handle) -> JoinHandle<()> {
        runtime.spawn(self.run())
    }

    async fn run(mut self) {
        let mut previous = None;

        loop {
            let received = tokio::select! {
                _ = self.shutdown.triggered() => break,
                received = self.states.recv() => received,
            };

            let repair = match received {
                Ok(state) => {
                    let action = decide(previous, state);
                    debug!(previous = ?previous, %state, ?action, "Connection state observed");
                    previous = Some(state);
                    if action == RepairAction::RecreateCandidacy {
                        warn!(
                            candidate_id = %self.candidacy.candidate_id(),
                            "Session lost, re-creating candidacy"
                        );
                    }
                    action == RepairAction::RecreateCandidacy
                }
                Err(RecvError::Lagged(skipped)) => {
                    // The dropped window may have held a LOST
                    warn!(skipped, "Connection state notifications lagged, checking candidacy");
                    true
                }
                Err(RecvError::Closed) => break,
            };

            if repair && self.repair().await.is_err() {
                break;
            }
        }

        debug!(candidate_id = %self.candidacy.candidate_id(), "Reconnection handler stopped");
    }

    /// Wait for a session and ensure the candidacy node, until it works or
    /// shutdown is requested
    async fn repair(&mut self) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                _ = self.shutdown.triggered() => return Err(ElectionError::Cancelled),
                outcome = restore(&self.client, &self.candidacy) => outcome,
            };

            match outcome {
                Ok(path) => {
                    info!(%path, attempt, "Candidacy restored");
                    return Ok(());
                }
                Err(err) => {
                    let delay = self.policy.next_delay();
                    error!(
                        attempt,
                        error = %err,
                        retry_in = ?delay,
                        "Candidacy repair failed, retrying"
                    );
                    self.shutdown.sleep(delay).await?;
                }
            }
        }
    }
}

async fn restore(client: &Arc<dyn CoordinationClient>, candidacy: &Candidacy) -> Result<String> {
    if !client.block_until_connected_or_timed_out().await {
        return Err(CoordError::ConnectionLoss.into());
    }
    candidacy.ensure().await
}
