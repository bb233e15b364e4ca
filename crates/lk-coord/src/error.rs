//! Error types for coordination operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordError {
    #[error("Connection to the coordination service lost")]
    ConnectionLoss,

    #[error("Session expired")]
    SessionExpired,

    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Ephemeral nodes may not have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("Invalid path: {0}")]
    BadPath(String),

    #[error("Invalid connect string: {0}")]
    BadConnectString(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Client is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordError {
    /// Errors the transport layer retries on its own before giving up
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionLoss | Self::SessionExpired)
    }
}

pub type Result<T> = std::result::Result<T, CoordError>;
