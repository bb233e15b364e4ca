//! Coordination client interface
//!
//! The election crates only talk to the coordination service through
//! [`CoordinationClient`]. Sessions, ephemeral/sequential nodes and the two
//! notification streams (connection state and node changes) are the whole
//! contract.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::broadcast;

use crate::error::{CoordError, Result};

const DEFAULT_PORT: u16 = 2181;
const MAX_BACKOFF_SHIFT: u32 = 29;

/// Connection state reported by a coordination client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// First successful connection
    Connected,
    /// Connection dropped; the session may still be alive
    Suspended,
    /// Connection re-established after a suspension or a lost session
    Reconnected,
    /// Session is gone; every ephemeral node it owned has been removed
    Lost,
    /// Connected to a server that only serves reads
    ReadOnly,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected | Self::ReadOnly)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "CONNECTED",
            Self::Suspended => "SUSPENDED",
            Self::Reconnected => "RECONNECTED",
            Self::Lost => "LOST",
            Self::ReadOnly => "READ_ONLY",
        };
        f.write_str(name)
    }
}

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    PersistentSequential,
    Ephemeral,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}

/// Node metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStat {
    /// Transaction id that created the node
    pub czxid: u64,
    /// Transaction id of the last data change
    pub mzxid: u64,
    pub version: u32,
    /// Owning session for ephemeral nodes
    pub ephemeral_owner: Option<i64>,
    pub data_length: usize,
    pub num_children: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    Created,
    Deleted,
    DataChanged,
}

/// A change to a single node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub path: String,
}

impl NodeEvent {
    pub fn parent(&self) -> &str {
        parent_path(&self.path)
    }
}

/// Parent of an absolute path (`/` for top-level nodes and for `/` itself)
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Transport-level retry used while establishing a session.
///
/// Exponential backoff with a bounded number of attempts: attempt `n` sleeps
/// `base_sleep * k` where `k` is random in `1..=2^(n+1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRetry {
    pub base_sleep: Duration,
    pub max_retries: u32,
}

impl Default for ConnectionRetry {
    fn default() -> Self {
        Self {
            base_sleep: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

impl ConnectionRetry {
    pub fn new(base_sleep: Duration, max_retries: u32) -> Self {
        Self {
            base_sleep,
            max_retries,
        }
    }

    /// Sleep before retry number `attempt` (zero based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = 1u32 << (attempt.min(MAX_BACKOFF_SHIFT) + 1);
        let factor = rand::rng().random_range(1..=ceiling);
        self.base_sleep.saturating_mul(factor)
    }
}

/// Client construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Suspension longer than this is treated as session loss
    pub session_timeout: Duration,
    /// Bound of [`CoordinationClient::block_until_connected_or_timed_out`]
    pub connection_timeout: Duration,
    pub retry: ConnectionRetry,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(15),
            retry: ConnectionRetry::default(),
        }
    }
}

/// Parsed `host:port[,host:port...]` connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectString {
    hosts: Vec<(String, u16)>,
}

impl ConnectString {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut hosts = Vec::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (host, port) = match entry.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port
                        .parse()
                        .map_err(|_| CoordError::BadConnectString(raw.to_string()))?;
                    (host, port)
                }
                None => (entry, DEFAULT_PORT),
            };
            if host.is_empty() {
                return Err(CoordError::BadConnectString(raw.to_string()));
            }
            hosts.push((host.to_string(), port));
        }

        if hosts.is_empty() {
            return Err(CoordError::BadConnectString(raw.to_string()));
        }
        Ok(Self { hosts })
    }

    pub fn hosts(&self) -> &[(String, u16)] {
        &self.hosts
    }
}

impl fmt::Display for ConnectString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .hosts
            .iter()
            .map(|(host, port)| format!("{host}:{port}"))
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

/// Session-oriented client of a hierarchical coordination store.
///
/// Connection-state notifications are delivered through [`subscribe`]; a
/// subscriber that stops receiving holds up nobody but itself, since each
/// subscription buffers independently.
///
/// [`subscribe`]: CoordinationClient::subscribe
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Start the client. Fails if the session cannot be established.
    async fn start(&self) -> Result<()>;

    /// Create a node, creating missing parents as persistent nodes.
    ///
    /// Returns the created path, which carries the sequence suffix for
    /// sequential modes.
    async fn create(&self, path: &str, mode: CreateMode, data: &[u8]) -> Result<String>;

    /// Names (not paths) of the direct children of `path`
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    async fn stat(&self, path: &str) -> Result<NodeStat>;

    async fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Id of the live session, if any
    fn session_id(&self) -> Option<i64>;

    /// Subscribe to connection state changes
    fn subscribe(&self) -> broadcast::Receiver<ConnectionState>;

    /// Subscribe to node changes anywhere in the store
    fn node_events(&self) -> broadcast::Receiver<NodeEvent>;

    /// Wait until connected or until the connection timeout elapses.
    /// Returns `true` when connected.
    async fn block_until_connected_or_timed_out(&self) -> bool;

    /// Close the client and end its session
    async fn close(&self) -> Result<()>;
}

/// Builds clients from connection strings
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        connect_string: &str,
        options: ClientOptions,
    ) -> Result<Arc<dyn CoordinationClient>>;
}
