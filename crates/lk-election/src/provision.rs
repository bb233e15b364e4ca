//! Retry-provisioning driver
//!
//! One-shot background task that brings a candidate from nothing to actively
//! contesting leadership. Three ordered steps, each retried on failure:
//!
//! 1. ensure the candidacy node exists
//! 2. start the coordination client
//! 3. start the election primitive
//!
//! The task finishes after step 3 or when shutdown is requested. Progress is
//! published on a watch channel.

use std::fmt;
use std::sync::Arc;

use lk_coord::{CoordinationClient, ElectionPrimitive, ElectionScope};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::candidacy::Candidacy;
use crate::error::{ElectionError, Result};
use crate::retry::{retry, RetryPolicy, Shutdown, StepState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    CreateCandidacy,
    StartClient,
    StartElection,
}

impl ProvisioningStep {
    pub const ALL: [ProvisioningStep; 3] = [
        ProvisioningStep::CreateCandidacy,
        ProvisioningStep::StartClient,
        ProvisioningStep::StartElection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CreateCandidacy => "create_candidacy",
            Self::StartClient => "start_client",
            Self::StartElection => "start_election",
        }
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the driver is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStatus {
    /// Driver scheduled, not running yet
    Pending,
    InProgress {
        step: ProvisioningStep,
        state: StepState,
    },
    /// All steps done; the primitive is contesting leadership
    Active,
    /// Shutdown requested before provisioning finished
    Cancelled,
    /// A step ran out of attempts (only with a bounded retry policy)
    Failed { step: ProvisioningStep },
}

impl ProvisioningStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the driver has finished, one way or another
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Active | Self::Cancelled | Self::Failed { .. })
    }
}

pub(crate) struct Provisioner {
    pub(crate) client: Arc<dyn CoordinationClient>,
    pub(crate) primitive: Arc<dyn ElectionPrimitive>,
    pub(crate) candidacy: Arc<Candidacy>,
    pub(crate) scope: ElectionScope,
    pub(crate) policy: RetryPolicy,
    pub(crate) status_tx: watch::Sender<ProvisioningStatus>,
    pub(crate) shutdown: Shutdown,
}

impl Provisioner {
    pub(crate) fn spawn(self, runtime: &tokio::runtime::Handle) -> JoinHandle<Result<()>> {
        runtime.spawn(self.run())
    }

    async fn run(self) -> Result<()> {
        let Provisioner {
            client,
            primitive,
            candidacy,
            scope,
            policy,
            status_tx,
            mut shutdown,
        } = self;

        info!(
            scope = %scope,
            candidate_id = %candidacy.candidate_id(),
            "Provisioning election participation"
        );

        for step in ProvisioningStep::ALL {
            status_tx.send_replace(ProvisioningStatus::InProgress {
                step,
                state: StepState::Pending,
            });

            let outcome = retry(
                step.name(),
                &policy,
                &mut shutdown,
                |state| {
                    status_tx.send_replace(ProvisioningStatus::InProgress { step, state });
                },
                || perform(step, &client, &primitive, &candidacy),
            )
            .await;

            match outcome {
                Ok(()) => info!(scope = %scope, %step, "Provisioning step complete"),
                Err(ElectionError::Cancelled) => {
                    info!(scope = %scope, %step, "Provisioning cancelled");
                    status_tx.send_replace(ProvisioningStatus::Cancelled);
                    return Err(ElectionError::Cancelled);
                }
                Err(err) => {
                    warn!(scope = %scope, %step, error = %err, "Provisioning abandoned");
                    status_tx.send_replace(ProvisioningStatus::Failed { step });
                    return Err(err);
                }
            }
        }

        status_tx.send_replace(ProvisioningStatus::Active);
        info!(
            scope = %scope,
            candidate_id = %candidacy.candidate_id(),
            path = ?candidacy.current_path(),
            "Election participation active"
        );
        Ok(())
    }
}

async fn perform(
    step: ProvisioningStep,
    client: &Arc<dyn CoordinationClient>,
    primitive: &Arc<dyn ElectionPrimitive>,
    candidacy: &Candidacy,
) -> Result<()> {
    match step {
        ProvisioningStep::CreateCandidacy => candidacy.ensure().await.map(|_| ()),
        ProvisioningStep::StartClient => Ok(client.start().await?),
        ProvisioningStep::StartElection => Ok(primitive.start().await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_helpers() {
        assert!(ProvisioningStatus::Active.is_active());
        assert!(ProvisioningStatus::Active.is_terminal());
        assert!(ProvisioningStatus::Cancelled.is_terminal());
        assert!(ProvisioningStatus::Failed {
            step: ProvisioningStep::StartClient
        }
        .is_terminal());
        assert!(!ProvisioningStatus::Pending.is_terminal());
        assert!(!ProvisioningStatus::InProgress {
            step: ProvisioningStep::CreateCandidacy,
            state: StepState::Retrying { attempt: 3 },
        }
        .is_terminal());
    }

    #[test]
    fn test_steps_run_in_order() {
        let names: Vec<_> = ProvisioningStep::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["create_candidacy", "start_client", "start_election"]);
    }
}
