//! Cluster-wide id generation from sequential nodes

use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::{CoordinationClient, CreateMode};

/// Parent of id nodes unless configured otherwise
pub const ID_ROOT: &str = "/ids";

const ID_PREFIX: &str = "id-";

/// Hands out ids that are unique and increasing across every client of the
/// same ensemble.
///
/// Each id is the sequence suffix of a persistent-sequential node created
/// under the root. The node is deleted right after; the parent's sequence
/// counter keeps increasing regardless.
pub struct IdGenerator {
    client: Arc<dyn CoordinationClient>,
    prefix: String,
}

impl IdGenerator {
    pub fn new(client: Arc<dyn CoordinationClient>) -> Self {
        Self::with_root(client, ID_ROOT)
    }

    pub fn with_root(client: Arc<dyn CoordinationClient>, root: impl AsRef<str>) -> Self {
        let root = root.as_ref().trim_end_matches('/');
        Self {
            client,
            prefix: format!("{root}/{ID_PREFIX}"),
        }
    }

    /// Next id, or `None` if the ensemble could not be reached
    pub async fn gen_id(&self) -> Option<String> {
        let path = match self
            .client
            .create(&self.prefix, CreateMode::PersistentSequential, &[])
            .await
        {
            Ok(path) => path,
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "Id generation failed");
                return None;
            }
        };

        if let Err(e) = self.client.delete(&path).await {
            debug!(%path, error = %e, "Id node left behind");
        }
        path.strip_prefix(&self.prefix).map(str::to_string)
    }
}
