//! Latchkey Coordination Layer
//!
//! Everything the election service needs from a coordination store:
//! - `CoordinationClient` / `Connector`: the client seam
//! - `MemoryEnsemble`: an in-process store with sessions, ephemeral and
//!   sequential nodes, change notifications and fault injection
//! - `LeaderLatch`: the sequence-ordered election primitive
//! - `StatusServer`: the plain-text `stat` port
//! - `IdGenerator`: unique increasing ids from sequential nodes

pub mod client;
pub mod error;
pub mod id;
pub mod latch;
pub mod memory;
pub mod primitive;
pub mod scope;
pub mod status;

pub use client::{
    parent_path, ClientOptions, ConnectString, ConnectionRetry, ConnectionState,
    CoordinationClient, Connector, CreateMode, NodeEvent, NodeEventKind, NodeStat,
};
pub use error::{CoordError, Result};
pub use id::{IdGenerator, ID_ROOT};
pub use latch::{LeaderLatch, Participant};
pub use memory::{EnsembleStats, MemoryClient, MemoryEnsemble, ENSEMBLE_VERSION};
pub use primitive::{ElectionPrimitive, LeadershipListener, LeadershipStatus, StatusListener};
pub use scope::{ElectionScope, CANDIDATE_PREFIX, ELECTION_ROOT};
pub use status::StatusServer;
