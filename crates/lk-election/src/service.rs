//! Election service façade
//!
//! Owns the coordination client and the election primitive, and wires up:
//! - the provisioning driver (one-shot, scheduled at construction)
//! - the reconnection handler (runs until close)
//!
//! Construction returns immediately; participation becomes active in the
//! background. `close()` is best effort and never fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lk_coord::{
    ClientOptions, Connector, CoordinationClient, ElectionPrimitive, ElectionScope, LeaderLatch,
    LeadershipListener,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::candidacy::Candidacy;
use crate::error::{ElectionError, Result};
use crate::provision::{ProvisioningStatus, Provisioner};
use crate::reconnect::ReconnectionHandler;
use crate::retry::{shutdown_channel, RetryPolicy, ShutdownTrigger};

/// Inputs of an [`ElectionService`]
#[derive(Debug, Clone)]
pub struct ElectionSettings {
    /// `host:port[,host:port...]` of the coordination ensemble
    pub connect_string: String,
    /// Election scene; the scope path is `/election/<scene>`
    pub scene: String,
    /// Opaque identity stored in the candidacy node
    pub candidate_id: String,
    pub retry: RetryPolicy,
    pub client: ClientOptions,
}

impl ElectionSettings {
    /// Settings with a random candidate id and default policies
    pub fn new(connect_string: impl Into<String>, scene: impl Into<String>) -> Self {
        Self {
            connect_string: connect_string.into(),
            scene: scene.into(),
            candidate_id: Uuid::new_v4().to_string(),
            retry: RetryPolicy::default(),
            client: ClientOptions::default(),
        }
    }

    pub fn with_candidate_id(mut self, candidate_id: impl Into<String>) -> Self {
        self.candidate_id = candidate_id.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_client_options(mut self, client: ClientOptions) -> Self {
        self.client = client;
        self
    }

    /// Check required fields and derive the election scope
    pub fn validate(&self) -> Result<ElectionScope> {
        if self.connect_string.trim().is_empty() {
            return Err(ElectionError::Config("connect string is required".to_string()));
        }
        if self.candidate_id.is_empty() {
            return Err(ElectionError::Config("candidate id is required".to_string()));
        }
        ElectionScope::new(self.scene.clone()).map_err(|e| ElectionError::Config(e.to_string()))
    }
}

/// One candidate in one election scope
pub struct ElectionService {
    scope: ElectionScope,
    candidate_id: String,
    client: Arc<dyn CoordinationClient>,
    primitive: Arc<dyn ElectionPrimitive>,
    candidacy: Arc<Candidacy>,
    status_rx: watch::Receiver<ProvisioningStatus>,
    shutdown: ShutdownTrigger,
    driver: Mutex<Option<JoinHandle<Result<()>>>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ElectionService {
    /// Connect a client, build a [`LeaderLatch`] reporting to `listener`, and
    /// start participating in the background.
    ///
    /// Must be called inside a Tokio runtime. Performs no I/O; only missing or
    /// malformed settings fail.
    pub fn new(
        connector: &dyn Connector,
        settings: ElectionSettings,
        listener: Arc<dyn LeadershipListener>,
    ) -> Result<Self> {
        let scope = settings.validate()?;
        let client = connector.connect(&settings.connect_string, settings.client)?;

        let latch = LeaderLatch::new(client.clone(), scope.clone(), settings.candidate_id.clone());
        latch.add_listener(listener);

        Self::assemble(client, Arc::new(latch), scope, settings)
    }

    /// Same wiring as [`new`](Self::new) around caller-supplied collaborators.
    /// Listeners are the caller's business here.
    pub fn with_parts(
        client: Arc<dyn CoordinationClient>,
        primitive: Arc<dyn ElectionPrimitive>,
        settings: ElectionSettings,
    ) -> Result<Self> {
        let scope = settings.validate()?;
        Self::assemble(client, primitive, scope, settings)
    }

    fn assemble(
        client: Arc<dyn CoordinationClient>,
        primitive: Arc<dyn ElectionPrimitive>,
        scope: ElectionScope,
        settings: ElectionSettings,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ElectionError::Config("election service requires a Tokio runtime".to_string())
        })?;

        let candidacy = Arc::new(Candidacy::new(
            client.clone(),
            scope.clone(),
            settings.candidate_id.clone(),
        ));
        let (shutdown, shutdown_rx) = shutdown_channel();
        let (status_tx, status_rx) = watch::channel(ProvisioningStatus::Pending);

        // Subscribe before the driver runs so no LOST can slip past
        let handler = ReconnectionHandler {
            client: client.clone(),
            candidacy: candidacy.clone(),
            policy: settings.retry,
            states: client.subscribe(),
            shutdown: shutdown_rx.clone(),
        }
        .spawn(&runtime);

        let driver = Provisioner {
            client: client.clone(),
            primitive: primitive.clone(),
            candidacy: candidacy.clone(),
            scope: scope.clone(),
            policy: settings.retry,
            status_tx,
            shutdown: shutdown_rx,
        }
        .spawn(&runtime);

        info!(
            scope = %scope,
            candidate_id = %settings.candidate_id,
            connect_string = %settings.connect_string,
            "Election service created"
        );

        Ok(Self {
            scope,
            candidate_id: settings.candidate_id,
            client,
            primitive,
            candidacy,
            status_rx,
            shutdown,
            driver: Mutex::new(Some(driver)),
            handler: Mutex::new(Some(handler)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn scope(&self) -> &ElectionScope {
        &self.scope
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    pub fn has_leadership(&self) -> bool {
        self.primitive.has_leadership()
    }

    /// Path of the current candidacy node, once one has been ensured
    pub fn candidacy_path(&self) -> Option<String> {
        self.candidacy.current_path()
    }

    /// Subscribe to provisioning progress
    pub fn provisioning(&self) -> watch::Receiver<ProvisioningStatus> {
        self.status_rx.clone()
    }

    /// Wait until provisioning has finished.
    ///
    /// Errors with [`ElectionError::Cancelled`] if the service was closed
    /// first.
    pub async fn wait_until_active(&self) -> Result<()> {
        let mut rx = self.status_rx.clone();
        let status = match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => return Err(ElectionError::Cancelled),
        };

        match status {
            ProvisioningStatus::Active => Ok(()),
            ProvisioningStatus::Failed { step } => Err(ElectionError::ProvisioningFailed { step }),
            _ => Err(ElectionError::Cancelled),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop participating.
    ///
    /// Cancels pending retries, stops the reconnection handler, then closes
    /// the primitive and the client. Failures are logged, never returned. Only
    /// the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(scope = %self.scope, candidate_id = %self.candidate_id, "Closing election service");

        self.shutdown.trigger();

        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            match driver.await {
                Ok(Ok(())) | Ok(Err(ElectionError::Cancelled)) => {}
                Ok(Err(e)) => warn!(error = %e, "Provisioning had stopped with an error"),
                Err(e) => warn!(error = %e, "Provisioning task ended abnormally"),
            }
        }

        let handler = self.handler.lock().take();
        if let Some(handler) = handler {
            if let Err(e) = handler.await {
                warn!(error = %e, "Reconnection handler ended abnormally");
            }
        }

        if let Err(e) = self.primitive.close().await {
            error!(scope = %self.scope, error = %e, "Failed to close election primitive");
        }
        if let Err(e) = self.client.close().await {
            error!(scope = %self.scope, error = %e, "Failed to close coordination client");
        }

        info!(scope = %self.scope, candidate_id = %self.candidate_id, "Election service closed");
    }
}

impl Drop for ElectionService {
    fn drop(&mut self) {
        // Background tasks stop; the client and primitive are left to their owners
        self.shutdown.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_validation() {
        let settings = ElectionSettings::new("127.0.0.1:2181", "orders");
        assert!(Uuid::parse_str(&settings.candidate_id).is_ok());
        assert_eq!(settings.validate().unwrap().path(), "/election/orders");

        let err = ElectionSettings::new("  ", "orders").validate().unwrap_err();
        assert!(matches!(err, ElectionError::Config(_)));

        let err = ElectionSettings::new("127.0.0.1:2181", "")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ElectionError::Config(_)));

        let err = ElectionSettings::new("127.0.0.1:2181", "a/b")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ElectionError::Config(_)));

        let err = ElectionSettings::new("127.0.0.1:2181", "orders")
            .with_candidate_id("")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ElectionError::Config(_)));
    }

    #[test]
    fn test_random_candidate_ids_differ() {
        let a = ElectionSettings::new("127.0.0.1:2181", "orders");
        let b = ElectionSettings::new("127.0.0.1:2181", "orders");
        assert_ne!(a.candidate_id, b.candidate_id);
    }
}
