//! Error types for the election service

use lk_coord::CoordError;
use thiserror::Error;

use crate::provision::ProvisioningStep;

#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordError),

    #[error("Election service is shutting down")]
    Cancelled,

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Provisioning stopped at step {step}")]
    ProvisioningFailed { step: ProvisioningStep },
}

pub type Result<T> = std::result::Result<T, ElectionError>;
