//! Transport seam between the session and the peer network.
//!
//! The peer-to-peer layer (relay connection, signing, wire encoding) is an
//! external collaborator. This module only fixes the shape of what crosses
//! the boundary: outbound [`Particle`]s and inbound [`ParticleEvent`]s.

pub mod bridge;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::Identity;
use crate::types::{Node, Variables};

pub use bridge::{BridgeConfig, BridgeTransport};

/// A script submission addressed to the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Correlation id.
    pub id: String,
    /// Peer id of the submitting client.
    pub init_peer_id: String,
    /// Opaque orchestration script text.
    pub script: String,
    /// Variable bindings visible to the script.
    pub data: Variables,
    /// Time budget in milliseconds.
    pub ttl_ms: u64,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
}

/// A named result delivered asynchronously for a particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleEvent {
    pub particle_id: String,
    pub service: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Provenance metadata for `args`; opaque here.
    #[serde(default)]
    pub tetraplets: serde_json::Value,
}

impl ParticleEvent {
    pub fn new(
        particle_id: impl Into<String>,
        service: impl Into<String>,
        function: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            particle_id: particle_id.into(),
            service: service.into(),
            function: function.into(),
            args,
            tetraplets: serde_json::Value::Null,
        }
    }
}

/// Receiver for events coming back from the network.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: ParticleEvent);
}

/// An established connection to one relay.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Peer id of the relay this connection goes through.
    fn relay_peer_id(&self) -> &str;

    /// Hand a particle to the network. Returns once it has been accepted locally.
    async fn send(&self, particle: Particle) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Factory for relay connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `relay` as `identity`. Events for particles sent over the
    /// returned connection must be pushed into `sink`.
    async fn connect(
        &self,
        relay: &Node,
        identity: &Identity,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn Connection>>;
}
