//! Candidacy node ownership
//!
//! Both the provisioning driver and the reconnection handler go through
//! [`Candidacy::ensure`], which is serialized so the two can never both create
//! a node for the same session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lk_coord::{CoordError, CoordinationClient, CreateMode, ElectionScope};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::Result;

pub struct Candidacy {
    client: Arc<dyn CoordinationClient>,
    scope: ElectionScope,
    candidate_id: String,
    current: Mutex<Option<String>>,
    ensure_lock: tokio::sync::Mutex<()>,
    creations: AtomicU64,
}

impl Candidacy {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        scope: ElectionScope,
        candidate_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            scope,
            candidate_id: candidate_id.into(),
            current: Mutex::new(None),
            ensure_lock: tokio::sync::Mutex::new(()),
            creations: AtomicU64::new(0),
        }
    }

    /// Make sure a candidacy node owned by the current session exists and
    /// return its path. Creates one only when none is found.
    pub async fn ensure(&self) -> Result<String> {
        let _guard = self.ensure_lock.lock().await;

        if let Some(path) = self.find_owned().await? {
            debug!(scope = %self.scope, %path, "Candidacy node already present");
            *self.current.lock() = Some(path.clone());
            return Ok(path);
        }

        let path = self
            .client
            .create(
                &self.scope.candidate_prefix(),
                CreateMode::EphemeralSequential,
                self.candidate_id.as_bytes(),
            )
            .await?;
        self.creations.fetch_add(1, Ordering::SeqCst);

        info!(
            scope = %self.scope,
            candidate_id = %self.candidate_id,
            %path,
            "Candidacy node created"
        );
        *self.current.lock() = Some(path.clone());
        Ok(path)
    }

    /// Lowest candidacy node owned by the client's current session
    async fn find_owned(&self) -> Result<Option<String>> {
        let children = match self.client.children(self.scope.path()).await {
            Ok(children) => children,
            Err(CoordError::NoNode(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let Some(session) = self.client.session_id() else {
            return Ok(None);
        };

        for child in ElectionScope::ballot_order(children) {
            let path = self.scope.child_path(&child);
            match self.client.stat(&path).await {
                Ok(stat) if stat.ephemeral_owner == Some(session) => return Ok(Some(path)),
                Ok(_) | Err(CoordError::NoNode(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    /// Path of the node most recently ensured
    pub fn current_path(&self) -> Option<String> {
        self.current.lock().clone()
    }

    /// Number of nodes this candidacy has created
    pub fn creations(&self) -> u64 {
        self.creations.load(Ordering::SeqCst)
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lk_coord::{ClientOptions, MemoryEnsemble};

    #[tokio::test]
    async fn test_ensure_creates_once_per_session() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.client("127.0.0.1:2181", ClientOptions::default()).unwrap();
        let scope = ElectionScope::new("candidacy").unwrap();
        let candidacy = Candidacy::new(Arc::new(client.clone()), scope.clone(), "me");

        let first = candidacy.ensure().await.unwrap();
        let second = candidacy.ensure().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(candidacy.creations(), 1);
        assert_eq!(client.get_data(&first).await.unwrap(), b"me".to_vec());

        client.expire_session();
        let third = candidacy.ensure().await.unwrap();
        assert_ne!(third, first);
        assert_eq!(candidacy.creations(), 2);
        assert_eq!(candidacy.current_path(), Some(third));
        assert_eq!(client.children(scope.path()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_nodes_are_not_adopted() {
        let ensemble = MemoryEnsemble::new();
        let scope = ElectionScope::new("foreign").unwrap();
        let other = ensemble.client("127.0.0.1:2181", ClientOptions::default()).unwrap();
        other
            .create(&scope.candidate_prefix(), CreateMode::EphemeralSequential, b"other")
            .await
            .unwrap();

        let mine = ensemble.client("127.0.0.1:2181", ClientOptions::default()).unwrap();
        let candidacy = Candidacy::new(Arc::new(mine), scope.clone(), "me");
        let path = candidacy.ensure().await.unwrap();

        assert!(path.ends_with("candidate-0000000001"));
        assert_eq!(candidacy.creations(), 1);
    }
}
