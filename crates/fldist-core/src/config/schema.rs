//! Schema of `fldist.toml`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deploy::retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::error::{DistError, Result};
use crate::transport::BridgeConfig;
use crate::types::Node;

/// Name of the environment that exists without configuration.
pub const LOCAL_ENV: &str = "local";

/// Peer id of the node in the built-in `local` environment.
pub const LOCAL_PEER_ID: &str = "12D3KooWKEprYXUXqoV5xSBeyqrWLpQLLH4PXfvVkDJtmcqmh5V3";

pub const STAGE_ENV: &str = "stage";
pub const FAAS_NET_HTTPS_ENV: &str = "faasNetHttps";
pub const FAAS_DEV_ENV: &str = "faasDev";

/// Environments that exist without configuration.
pub const BUILTIN_ENVS: [&str; 4] = [FAAS_DEV_ENV, FAAS_NET_HTTPS_ENV, LOCAL_ENV, STAGE_ENV];

/// `(port, peer id)` of the nodes behind the stage and dev hosts.
const CLUSTER_NODES: [(u16, &str); 7] = [
    (19001, "12D3KooWEXNUbCXooUwHrHBbrmjsrpHXoEphPwbjQXEGyzbqKnE9"),
    (19002, "12D3KooWHk9BjDQBUqnavciRPhAYFvqKBe4ZiPPvde7vDaqgn5er"),
    (19003, "12D3KooWBUJifCTgaxAUrcM9JysqCcS4CS8tiYH5hExbdWCAoNwb"),
    (19004, "12D3KooWJbJFaZ3k5sNd8DjQgg3aERoKtBAnirEvPV8yp76kEXHB"),
    (19005, "12D3KooWCKCeqLPSgMnDjyFsJuWqREDtKNHx1JEBiwaMXhCLNTRb"),
    (19990, "12D3KooWMhVpgfQxBLkQkJed8VFNvgN4iE6MD7xCybb1ZYWW2Gtz"),
    (19100, "12D3KooWPnLxnY71JDxvB3zbjKu9k1BCYNthGZw6iGrLYsR1RnWM"),
];

/// `(host, port, peer id)` of the public network nodes.
const NET_NODES: [(&str, u16, &str); 11] = [
    ("net01.fluence.dev", 19001, "12D3KooWEXNUbCXooUwHrHBbrmjsrpHXoEphPwbjQXEGyzbqKnE9"),
    ("net01.fluence.dev", 19990, "12D3KooWMhVpgfQxBLkQkJed8VFNvgN4iE6MD7xCybb1ZYWW2Gtz"),
    ("net02.fluence.dev", 19001, "12D3KooWHk9BjDQBUqnavciRPhAYFvqKBe4ZiPPvde7vDaqgn5er"),
    ("net03.fluence.dev", 19001, "12D3KooWBUJifCTgaxAUrcM9JysqCcS4CS8tiYH5hExbdWCAoNwb"),
    ("net04.fluence.dev", 19001, "12D3KooWJbJFaZ3k5sNd8DjQgg3aERoKtBAnirEvPV8yp76kEXHB"),
    ("net05.fluence.dev", 19001, "12D3KooWCKCeqLPSgMnDjyFsJuWqREDtKNHx1JEBiwaMXhCLNTRb"),
    ("net06.fluence.dev", 19001, "12D3KooWKnRcsTpYx9axkJ6d69LPfpPXrkVLe96skuPTAo76LLVH"),
    ("net07.fluence.dev", 19001, "12D3KooWBSdm6TkqnEFrgBuSkpVE3dR1kr6952DsWQRNwJZjFZBv"),
    ("net08.fluence.dev", 19001, "12D3KooWGzNvhSDsgFoHwpWHAyPf1kcTYCGeRBPfznL8J6qdyu2H"),
    ("net09.fluence.dev", 19001, "12D3KooWF7gjXhQ4LaKj6j7ntxsPpGk34psdQicN2KNfBi9bFKXg"),
    ("net10.fluence.dev", 19001, "12D3KooWB9P1xmV3c7ZPpBemovbwCiRRTKd3Kq2jsVPQN4ZukDfy"),
];

fn wss_node(host: &str, port: u16, peer_id: &str) -> Node {
    Node::new(peer_id, format!("/dns4/{host}/tcp/{port}/wss/p2p/{peer_id}"))
}

/// Default request time-to-live, in milliseconds.
pub const DEFAULT_TTL_MS: u64 = 60_000;

fn default_env() -> String {
    LOCAL_ENV.to_string()
}

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Nodes of one named network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Environment {
    /// The single-node environment of a locally running peer.
    pub fn local() -> Self {
        Self {
            nodes: vec![Node::new(
                LOCAL_PEER_ID,
                format!("/ip4/127.0.0.1/tcp/4310/ws/p2p/{LOCAL_PEER_ID}"),
            )],
        }
    }

    /// Nodes of `host` in the stage/dev cluster layout.
    fn cluster(host: &str) -> Self {
        Self {
            nodes: CLUSTER_NODES
                .iter()
                .map(|(port, peer_id)| wss_node(host, *port, peer_id))
                .collect(),
        }
    }

    /// A built-in environment by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            LOCAL_ENV => Some(Self::local()),
            STAGE_ENV => Some(Self::cluster("stage.fluence.dev")),
            FAAS_DEV_ENV => Some(Self::cluster("dev.fluence.dev")),
            FAAS_NET_HTTPS_ENV => Some(Self {
                nodes: NET_NODES
                    .iter()
                    .map(|(host, port, peer_id)| wss_node(host, *port, peer_id))
                    .collect(),
            }),
            _ => None,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FldistConfig {
    #[serde(default = "default_env")]
    pub default_env: String,

    /// Request time-to-live in milliseconds.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Client seed; a fresh identity is generated per run when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,

    /// Attempts per module or blueprint upload.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Pause between upload attempts, in milliseconds.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub environments: BTreeMap<String, Environment>,

    /// Helper process that provides the peer-to-peer transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<BridgeConfig>,
}

impl Default for FldistConfig {
    fn default() -> Self {
        Self {
            default_env: default_env(),
            ttl_ms: DEFAULT_TTL_MS,
            seed: None,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: 0,
            environments: BTreeMap::new(),
            transport: None,
        }
    }
}

impl FldistConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts)
            .with_backoff(Duration::from_millis(self.retry_backoff_ms))
    }

    /// Look up an environment. Configured environments shadow built-in ones
    /// of the same name.
    pub fn environment(&self, name: &str) -> Result<Environment> {
        if let Some(env) = self.environments.get(name) {
            return Ok(env.clone());
        }
        if let Some(env) = Environment::builtin(name) {
            return Ok(env);
        }
        let mut known: Vec<&str> = self.environments.keys().map(String::as_str).collect();
        known.extend(BUILTIN_ENVS);
        known.sort_unstable();
        known.dedup();
        Err(DistError::Config(format!(
            "unknown environment '{name}' (known: {})",
            known.join(", ")
        )))
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl_ms == 0 {
            return Err(DistError::Config("ttl_ms must be positive".to_string()));
        }
        if self.retry_attempts == 0 {
            return Err(DistError::Config(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        for (name, env) in &self.environments {
            if let Some(node) = env.nodes.iter().find(|n| n.peer_id.is_empty()) {
                return Err(DistError::Config(format!(
                    "environment '{name}' has a node without peer_id (address '{}')",
                    node.address
                )));
            }
        }
        Ok(())
    }
}
