//! In-process coordination service
//!
//! `MemoryEnsemble` is a single-process stand-in for a coordination ensemble:
//! a hierarchical node tree with sessions, ephemeral and sequential nodes and
//! a change feed. Clients connect through [`MemoryClient`], which layers the
//! connection state machine on top.
//!
//! Fault injection is part of the API: the ensemble can be made unavailable,
//! and clients can be suspended or have their session expired.

mod client;

pub use client::MemoryClient;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::client::{
    parent_path, ClientOptions, ConnectString, Connector, CoordinationClient, CreateMode,
    NodeEvent, NodeEventKind, NodeStat,
};
use crate::error::{CoordError, Result};
use crate::scope::ElectionScope;

/// Version reported on the status port
pub const ENSEMBLE_VERSION: &str = "3.9.0-latchkey";

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct ZNode {
    data: Vec<u8>,
    czxid: u64,
    mzxid: u64,
    version: u32,
    ephemeral_owner: Option<i64>,
    /// Bumped on every child create/delete; source of sequence suffixes
    cversion: u64,
}

impl ZNode {
    fn new(data: Vec<u8>, zxid: u64, ephemeral_owner: Option<i64>) -> Self {
        Self {
            data,
            czxid: zxid,
            mzxid: zxid,
            version: 0,
            ephemeral_owner,
            cversion: 0,
        }
    }
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, ZNode>,
    /// Live sessions and the ephemeral nodes each one owns
    sessions: HashMap<i64, BTreeSet<String>>,
    next_session: i64,
    zxid: u64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), ZNode::new(Vec::new(), 0, None));
        Self {
            nodes,
            sessions: HashMap::new(),
            next_session: 1,
            zxid: 0,
        }
    }

    fn next_zxid(&mut self) -> u64 {
        self.zxid += 1;
        self.zxid
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn insert(&mut self, path: String, data: Vec<u8>, owner: Option<i64>) -> Result<()> {
        let parent = parent_path(&path).to_string();
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| CoordError::NoNode(parent.clone()))?;
        if parent_node.ephemeral_owner.is_some() {
            return Err(CoordError::NoChildrenForEphemerals(path));
        }
        parent_node.cversion += 1;

        let zxid = self.next_zxid();
        if let Some(session) = owner {
            self.sessions.entry(session).or_default().insert(path.clone());
        }
        self.nodes.insert(path, ZNode::new(data, zxid, owner));
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        if path == "/" {
            return Err(CoordError::BadPath("cannot delete the root node".to_string()));
        }
        if !self.nodes.contains_key(path) {
            return Err(CoordError::NoNode(path.to_string()));
        }
        if !self.child_names(path).is_empty() {
            return Err(CoordError::NotEmpty(path.to_string()));
        }

        let node = self
            .nodes
            .remove(path)
            .ok_or_else(|| CoordError::NoNode(path.to_string()))?;
        if let Some(owner) = node.ephemeral_owner {
            if let Some(owned) = self.sessions.get_mut(&owner) {
                owned.remove(path);
            }
        }
        if let Some(parent) = self.nodes.get_mut(parent_path(path)) {
            parent.cversion += 1;
        }
        self.next_zxid();
        Ok(())
    }
}

fn validate_path(path: &str) -> Result<()> {
    let valid = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//")
        && path.split('/').all(|segment| segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(CoordError::BadPath(path.to_string()))
    }
}

/// Counters shown on the status port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleStats {
    pub sessions: usize,
    pub nodes: usize,
    pub zxid: u64,
    pub requests: u64,
}

struct Inner {
    tree: Mutex<Tree>,
    available: AtomicBool,
    requests: AtomicU64,
    events: broadcast::Sender<NodeEvent>,
}

/// Shared handle to an in-process ensemble
#[derive(Clone)]
pub struct MemoryEnsemble {
    inner: Arc<Inner>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tree: Mutex::new(Tree::new()),
                available: AtomicBool::new(true),
                requests: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Create a client bound to this ensemble
    pub fn client(&self, connect_string: &str, options: ClientOptions) -> Result<MemoryClient> {
        let connect_string = ConnectString::parse(connect_string)?;
        Ok(MemoryClient::new(self.clone(), connect_string, options))
    }

    /// Simulate an outage (`false`) or recovery (`true`) of the whole ensemble
    pub fn set_available(&self, available: bool) {
        let previous = self.inner.available.swap(available, Ordering::SeqCst);
        if previous != available {
            info!(available, "Ensemble availability changed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    fn check_request(&self) -> Result<()> {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        if self.is_available() {
            Ok(())
        } else {
            Err(CoordError::ConnectionLoss)
        }
    }

    fn check_session(tree: &Tree, session: i64) -> Result<()> {
        if tree.sessions.contains_key(&session) {
            Ok(())
        } else {
            Err(CoordError::SessionExpired)
        }
    }

    fn publish(&self, events: Vec<NodeEvent>) {
        for event in events {
            // No receivers is fine; nobody is watching yet.
            let _ = self.inner.events.send(event);
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    pub fn open_session(&self) -> Result<i64> {
        self.check_request()?;
        let mut tree = self.inner.tree.lock();
        let session = tree.next_session;
        tree.next_session += 1;
        tree.sessions.insert(session, BTreeSet::new());
        debug!(session, "Session opened");
        Ok(session)
    }

    pub fn session_alive(&self, session: i64) -> bool {
        self.inner.tree.lock().sessions.contains_key(&session)
    }

    /// End a session, deleting every ephemeral node it owns.
    ///
    /// Works regardless of availability: expiry is decided by the ensemble,
    /// not requested by a client. Returns the deleted paths.
    pub fn close_session(&self, session: i64) -> Vec<String> {
        let removed: Vec<String> = {
            let mut tree = self.inner.tree.lock();
            let owned = tree.sessions.remove(&session).unwrap_or_default();
            owned
                .into_iter()
                .filter(|path| tree.remove(path).is_ok())
                .collect()
        };

        if !removed.is_empty() {
            debug!(session, removed = removed.len(), "Session ephemerals removed");
        }
        self.publish(
            removed
                .iter()
                .map(|path| NodeEvent {
                    kind: NodeEventKind::Deleted,
                    path: path.clone(),
                })
                .collect(),
        );
        removed
    }

    pub fn create(
        &self,
        session: i64,
        path: &str,
        mode: CreateMode,
        data: &[u8],
    ) -> Result<String> {
        self.check_request()?;
        validate_path(path)?;
        if path == "/" {
            return Err(CoordError::NodeExists(path.to_string()));
        }

        let mut events = Vec::new();
        let created = {
            let mut tree = self.inner.tree.lock();
            Self::check_session(&tree, session)?;

            // Missing ancestors become persistent nodes
            let parent = parent_path(path).to_string();
            let mut missing = Vec::new();
            let mut cursor = parent.as_str();
            while !tree.nodes.contains_key(cursor) {
                missing.push(cursor.to_string());
                cursor = parent_path(cursor);
            }
            for ancestor in missing.into_iter().rev() {
                tree.insert(ancestor.clone(), Vec::new(), None)?;
                events.push(NodeEvent {
                    kind: NodeEventKind::Created,
                    path: ancestor,
                });
            }

            let target = if mode.is_sequential() {
                let sequence = tree
                    .nodes
                    .get(&parent)
                    .map(|node| node.cversion)
                    .unwrap_or_default();
                format!("{path}{sequence:010}")
            } else {
                path.to_string()
            };
            if tree.nodes.contains_key(&target) {
                return Err(CoordError::NodeExists(target));
            }

            let owner = mode.is_ephemeral().then_some(session);
            tree.insert(target.clone(), data.to_vec(), owner)?;
            target
        };

        events.push(NodeEvent {
            kind: NodeEventKind::Created,
            path: created.clone(),
        });
        self.publish(events);
        Ok(created)
    }

    pub fn delete(&self, session: i64, path: &str) -> Result<()> {
        self.check_request()?;
        validate_path(path)?;
        {
            let mut tree = self.inner.tree.lock();
            Self::check_session(&tree, session)?;
            tree.remove(path)?;
        }
        self.publish(vec![NodeEvent {
            kind: NodeEventKind::Deleted,
            path: path.to_string(),
        }]);
        Ok(())
    }

    pub fn children(&self, session: i64, path: &str) -> Result<Vec<String>> {
        self.check_request()?;
        validate_path(path)?;
        let tree = self.inner.tree.lock();
        Self::check_session(&tree, session)?;
        if !tree.nodes.contains_key(path) {
            return Err(CoordError::NoNode(path.to_string()));
        }
        Ok(tree.child_names(path))
    }

    pub fn stat(&self, session: i64, path: &str) -> Result<NodeStat> {
        self.check_request()?;
        validate_path(path)?;
        let tree = self.inner.tree.lock();
        Self::check_session(&tree, session)?;
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| CoordError::NoNode(path.to_string()))?;
        Ok(NodeStat {
            czxid: node.czxid,
            mzxid: node.mzxid,
            version: node.version,
            ephemeral_owner: node.ephemeral_owner,
            data_length: node.data.len(),
            num_children: tree.child_names(path).len(),
        })
    }

    pub fn get_data(&self, session: i64, path: &str) -> Result<Vec<u8>> {
        self.check_request()?;
        validate_path(path)?;
        let tree = self.inner.tree.lock();
        Self::check_session(&tree, session)?;
        tree.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordError::NoNode(path.to_string()))
    }

    /// Session owning the lowest candidacy node of `scope`
    pub fn leader_session(&self, scope: &ElectionScope) -> Option<i64> {
        let tree = self.inner.tree.lock();
        let children = tree.child_names(scope.path());
        let leader = ElectionScope::ballot_order(children).into_iter().next()?;
        tree.nodes.get(&scope.child_path(&leader))?.ephemeral_owner
    }

    pub fn stats(&self) -> EnsembleStats {
        let tree = self.inner.tree.lock();
        EnsembleStats {
            sessions: tree.sessions.len(),
            nodes: tree.nodes.len(),
            zxid: tree.zxid,
            requests: self.inner.requests.load(Ordering::Relaxed),
        }
    }
}

impl Connector for MemoryEnsemble {
    fn connect(
        &self,
        connect_string: &str,
        options: ClientOptions,
    ) -> Result<Arc<dyn CoordinationClient>> {
        Ok(Arc::new(self.client(connect_string, options)?))
    }
}
