//! Run-scoped record of artifacts already placed on nodes.

use std::collections::HashMap;
use std::fmt;

use crate::types::Node;

/// Kind of artifact tracked by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Module,
    Blueprint,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Module => f.write_str("module"),
            ArtifactKind::Blueprint => f.write_str("blueprint"),
        }
    }
}

/// Deduplicates uploads within one orchestrator run.
///
/// Entries are keyed by value: the node's peer id and the artifact's kind and
/// name joined into one canonical string. Entries are never removed.
#[derive(Debug, Default, Clone)]
pub struct DeploymentCache {
    /// Canonical key -> identifier returned by the node for that upload.
    uploaded: HashMap<String, String>,
}

impl DeploymentCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(node: &Node, kind: ArtifactKind, artifact: &str) -> String {
        format!("{}\0{}:{}", node.peer_id, kind, artifact)
    }

    pub fn has_uploaded(&self, node: &Node, kind: ArtifactKind, artifact: &str) -> bool {
        self.uploaded.contains_key(&Self::key(node, kind, artifact))
    }

    /// Record a successful upload and the identifier the node returned for it.
    pub fn mark_uploaded(
        &mut self,
        node: &Node,
        kind: ArtifactKind,
        artifact: &str,
        assigned: impl Into<String>,
    ) {
        self.uploaded
            .insert(Self::key(node, kind, artifact), assigned.into());
    }

    /// Identifier recorded for an uploaded artifact.
    pub fn assigned_id(&self, node: &Node, kind: ArtifactKind, artifact: &str) -> Option<&str> {
        self.uploaded
            .get(&Self::key(node, kind, artifact))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.uploaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty()
    }
}
