//! Error types for deployment and request correlation.

use std::time::Duration;

/// Result type alias using [`DistError`].
pub type Result<T> = std::result::Result<T, DistError>;

/// Errors produced while talking to peers and deploying artifacts.
#[derive(Debug, thiserror::Error)]
pub enum DistError {
    /// Malformed configuration or deployment document.
    #[error("configuration error: {0}")]
    Config(String),

    /// A blueprint names a module that is not in the catalog.
    #[error("can't find dependency '{module}' for blueprint '{blueprint}'")]
    MissingDependency {
        /// Missing module name.
        module: String,
        /// Blueprint that declared the dependency.
        blueprint: String,
    },

    /// A distribution entry names an unknown blueprint.
    #[error("can't find blueprint '{0}'")]
    BlueprintNotFound(String),

    /// A distribution entry points past the end of the node list.
    #[error("node index {index} for blueprint '{blueprint}' is out of range ({nodes} nodes known)")]
    NodeIndexOutOfRange {
        /// Requested node index.
        index: usize,
        /// Number of known nodes.
        nodes: usize,
        /// Blueprint being distributed.
        blueprint: String,
    },

    /// The declarative deployment document failed validation.
    #[error("invalid deployment spec: {0}")]
    InvalidSpec(String),

    /// Failure sending to or receiving from the relay.
    #[error("transport error: {0}")]
    Transport(String),

    /// Could not establish a connection to a relay.
    #[error("failed to connect to relay {relay}: {reason}")]
    Connection {
        /// Relay peer id.
        relay: String,
        /// Underlying failure.
        reason: String,
    },

    /// Replacing the active connection with one to another relay failed.
    #[error("failed to switch connection from relay {from} to {to}: {reason}")]
    ConnectionSwap {
        /// Previously connected relay.
        from: String,
        /// Requested relay.
        to: String,
        /// Underlying failure.
        reason: String,
    },

    /// An upload kept failing after the retry budget was spent.
    #[error("failed to upload {artifact} to node {node} after {attempts} attempt(s): {source}")]
    UploadFailed {
        /// Artifact description, e.g. `module 'sqlite3'`.
        artifact: String,
        /// Target node peer id.
        node: String,
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        #[source]
        source: Box<DistError>,
    },

    /// The remote interpreter reported an execution fault.
    #[error("script execution failed (particle {particle_id}): {payload}")]
    RemoteScript {
        /// Correlation id of the failed request.
        particle_id: String,
        /// Decoded error payload.
        payload: serde_json::Value,
    },

    /// No result arrived before the TTL elapsed.
    #[error("request {particle_id} timed out after {ttl:?}")]
    Timeout {
        /// Correlation id of the request.
        particle_id: String,
        /// Time budget of the request.
        ttl: Duration,
    },

    /// The request was abandoned before it settled.
    #[error("request {particle_id} was cancelled")]
    Cancelled {
        /// Correlation id of the request.
        particle_id: String,
    },

    /// A fetch-style result did not have the expected shape.
    #[error("unexpected result for request {particle_id}: {reason}")]
    UnexpectedResult {
        /// Correlation id of the request.
        particle_id: String,
        /// What was wrong with the payload.
        reason: String,
    },

    /// Artifact bytes or script text could not be loaded.
    #[error("failed to load '{source_ref}': {reason}")]
    Load {
        /// File path or URL.
        source_ref: String,
        /// Underlying failure.
        reason: String,
    },

    /// Template rendering failed.
    #[error("template error: {0}")]
    Template(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DistError {
    /// Network level failures and timeouts.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DistError::Transport(_) | DistError::Connection { .. } | DistError::Timeout { .. }
        )
    }

    /// Whether an upload failing with this error may be attempted again.
    ///
    /// Besides transient failures this covers faults the peer reports while
    /// executing the upload script, such as the target being unreachable
    /// from the relay.
    pub fn is_retryable_upload(&self) -> bool {
        self.is_transient() || matches!(self, DistError::RemoteScript { .. })
    }
}
