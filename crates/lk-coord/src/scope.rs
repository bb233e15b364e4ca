//! Election scope paths and candidacy node naming

use std::fmt;

use crate::error::{CoordError, Result};

/// Parent of every election scope
pub const ELECTION_ROOT: &str = "/election";

/// Name prefix of candidacy nodes; the service appends a 10 digit sequence
pub const CANDIDATE_PREFIX: &str = "candidate-";

/// One leader-election contest, rooted at `/election/<scene>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElectionScope {
    scene: String,
    path: String,
}

impl ElectionScope {
    pub fn new(scene: impl Into<String>) -> Result<Self> {
        let scene = scene.into();
        if scene.is_empty() || scene.contains('/') || scene == "." || scene == ".." {
            return Err(CoordError::BadPath(format!(
                "invalid election scene '{scene}'"
            )));
        }
        let path = format!("{ELECTION_ROOT}/{scene}");
        Ok(Self { scene, path })
    }

    pub fn scene(&self) -> &str {
        &self.scene
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path handed to a sequential create of a candidacy node
    pub fn candidate_prefix(&self) -> String {
        format!("{}/{}", self.path, CANDIDATE_PREFIX)
    }

    pub fn child_path(&self, child: &str) -> String {
        format!("{}/{}", self.path, child)
    }

    /// Sequence number of a candidacy node name, `None` for foreign children
    pub fn sequence_of(child: &str) -> Option<u64> {
        child.strip_prefix(CANDIDATE_PREFIX)?.parse().ok()
    }

    /// Candidacy node names in ballot order (lowest sequence first)
    pub fn ballot_order(children: Vec<String>) -> Vec<String> {
        let mut ballots: Vec<(u64, String)> = children
            .into_iter()
            .filter_map(|child| Self::sequence_of(&child).map(|seq| (seq, child)))
            .collect();
        ballots.sort();
        ballots.into_iter().map(|(_, child)| child).collect()
    }
}

impl fmt::Display for ElectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
