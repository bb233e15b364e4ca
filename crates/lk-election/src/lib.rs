//! Latchkey Election Service
//!
//! Leader election that provisions itself and repairs itself:
//! - **Provisioning**: candidacy node, client session and election primitive
//!   are brought up in order, each step retried until it succeeds
//! - **Reconnection**: after a LOST session the candidacy node is re-created
//!   once a session is available again
//! - **Shutdown**: `close()` cancels retries and releases everything exactly
//!   once
//!
//! ```ignore
//! let ensemble = MemoryEnsemble::new();
//! let settings = ElectionSettings::new("127.0.0.1:2181", "orders");
//! let service = ElectionService::new(&ensemble, settings, Arc::new(StatusListener::new("a")))?;
//! service.wait_until_active().await?;
//! ```

pub mod candidacy;
pub mod error;
pub mod provision;
pub mod reconnect;
pub mod retry;
pub mod service;

pub use candidacy::Candidacy;
pub use error::{ElectionError, Result};
pub use provision::{ProvisioningStatus, ProvisioningStep};
pub use reconnect::{decide, RepairAction};
pub use retry::{retry, shutdown_channel, RetryPolicy, Shutdown, ShutdownTrigger, StepState};
pub use service::{ElectionService, ElectionSettings};
