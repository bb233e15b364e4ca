//! Leader-election primitive interface and leadership listeners

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::error::Result;

/// Leadership status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipStatus {
    /// This candidate is the leader
    Leader,
    /// Another candidate is the leader (or nobody is)
    Follower,
    /// Election not started yet
    Unknown,
}

/// Receives leadership transitions from an [`ElectionPrimitive`].
///
/// Callbacks run on the primitive's watch task and must not block.
pub trait LeadershipListener: Send + Sync {
    fn on_leadership_acquired(&self);
    fn on_leadership_lost(&self);
}

/// Contends for leadership inside one election scope
#[async_trait]
pub trait ElectionPrimitive: Send + Sync {
    /// Start contending. Fails if already started or closed, or if the first
    /// evaluation of the scope fails.
    async fn start(&self) -> Result<()>;

    /// Stop contending. Listeners are not notified of the implied loss.
    async fn close(&self) -> Result<()>;

    fn add_listener(&self, listener: Arc<dyn LeadershipListener>);

    fn has_leadership(&self) -> bool;
}

/// Listener that mirrors leadership into a watch channel
pub struct StatusListener {
    name: String,
    status_tx: watch::Sender<LeadershipStatus>,
}

impl StatusListener {
    pub fn new(name: impl Into<String>) -> Self {
        let (status_tx, _) = watch::channel(LeadershipStatus::Unknown);
        Self {
            name: name.into(),
            status_tx,
        }
    }

    pub fn status(&self) -> LeadershipStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to leadership status changes
    pub fn subscribe(&self) -> watch::Receiver<LeadershipStatus> {
        self.status_tx.subscribe()
    }

    fn set_status(&self, status: LeadershipStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            info!(candidate = %self.name, ?previous, ?status, "Leadership status changed");
        }
    }
}

impl LeadershipListener for StatusListener {
    fn on_leadership_acquired(&self) {
        self.set_status(LeadershipStatus::Leader);
    }

    fn on_leadership_lost(&self) {
        self.set_status(LeadershipStatus::Follower);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_listener_tracks_transitions() {
        let listener = StatusListener::new("a");
        let rx = listener.subscribe();
        assert_eq!(listener.status(), LeadershipStatus::Unknown);

        listener.on_leadership_acquired();
        assert_eq!(*rx.borrow(), LeadershipStatus::Leader);

        listener.on_leadership_lost();
        assert_eq!(listener.status(), LeadershipStatus::Follower);
    }
}
