//! Artifact model shared by the orchestrator, the app deployer and the CLI.
//!
//! These are passive values: nodes and module definitions are read-only
//! configuration, blueprints only gain an id once a peer accepts them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Variable bindings passed alongside a script.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Default linear memory size for uploaded modules, in wasm pages.
pub const DEFAULT_MEM_PAGES: u32 = 100;

/// A deployment target and/or relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Peer identity of the node.
    pub peer_id: String,
    /// Connection string (multiaddr). Empty when the node is only reachable via a relay.
    #[serde(default, alias = "multiaddr")]
    pub address: String,
}

impl Node {
    pub fn new(peer_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            address: address.into(),
        }
    }

    /// A node known only by its peer id.
    pub fn peer(peer_id: impl Into<String>) -> Self {
        Self::new(peer_id, "")
    }

    /// Whether a direct connection string is known for this node.
    pub fn is_dialable(&self) -> bool {
        !self.address.is_empty()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.peer_id)
    }
}

/// WASI sandbox settings of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasiConfig {
    #[serde(default)]
    pub preopened_files: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_dirs: Option<BTreeMap<String, String>>,
}

/// Module configuration as understood by the hosting peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module identity within a blueprint's dependency list.
    pub name: String,
    pub mem_pages_count: u32,
    pub logger_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mounted_binaries: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub wasi: WasiConfig,
}

impl ModuleConfig {
    /// Configuration with default memory and logging settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mem_pages_count: DEFAULT_MEM_PAGES,
            logger_enabled: true,
            mounted_binaries: None,
            wasi: WasiConfig::default(),
        }
    }
}

/// Short-form module config file, as accepted by `upload --config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfigArgs {
    pub name: String,
    #[serde(default)]
    pub mounted_binaries: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub preopened_files: Option<Vec<String>>,
    #[serde(default)]
    pub mapped_dirs: Option<BTreeMap<String, String>>,
}

impl From<ModuleConfigArgs> for ModuleConfig {
    fn from(args: ModuleConfigArgs) -> Self {
        let mut config = ModuleConfig::new(args.name);
        config.mounted_binaries = args.mounted_binaries;
        config.wasi.preopened_files = args.preopened_files.unwrap_or_default().into_iter().collect();
        config.wasi.mapped_dirs = args.mapped_dirs;
        config
    }
}

/// A binary module together with its sandbox configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct Module {
    pub bytes: Vec<u8>,
    pub config: ModuleConfig,
}

impl Module {
    pub fn new(bytes: Vec<u8>, config: ModuleConfig) -> Self {
        Self { bytes, config }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Module bytes in the base64 form peers expect.
    pub fn encoded_bytes(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.config.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// A named composition of module dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    /// Assigned by the target peer; may be predefined in a catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Module names or `hash:<hex>` references, in load order.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Blueprint {
    pub fn new<I, S>(name: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: None,
            name: name.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A running instance of a blueprint on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub blueprint_id: String,
    pub node: Node,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Orchestration script submitted for remote execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Assigned by the peer for stored scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub variables: Variables,
    /// Execution period for persistently stored scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

impl Script {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            content: content.into(),
            variables: Variables::new(),
            interval_secs: None,
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Mark the script as stored, running every `secs` seconds.
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = Some(secs);
        self
    }
}
