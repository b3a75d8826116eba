//! Client session: one identity, at most one active relay connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DistError, Result};
use crate::request::{CALLBACK_FUNCTION, CALLBACK_SERVICE, Correlator, Request, RequestHandle};
use crate::transport::{Connection, EventSink, Transport};
use crate::types::Node;

/// Length of a freshly generated seed, in bytes.
const SEED_LEN: usize = 32;

/// Client identity used to sign and route requests.
///
/// Key material is handled by the transport; the session only needs a stable
/// seed and the peer id derived from it, so that callbacks addressed to the
/// client resolve the same way across calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    seed: String,
    peer_id: String,
}

impl Identity {
    /// Derive an identity from an existing seed.
    pub fn from_seed(seed: impl Into<String>) -> Result<Self> {
        let seed = seed.into().trim().to_string();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&seed)
            .map_err(|e| DistError::Config(format!("invalid seed: {e}")))?;
        if bytes.is_empty() {
            return Err(DistError::Config("seed must not be empty".to_string()));
        }
        let peer_id = blake3::hash(&bytes).to_hex().to_string();
        Ok(Self { seed, peer_id })
    }

    /// Generate a new random identity.
    pub fn generate() -> Self {
        let bytes: [u8; SEED_LEN] = rand::random();
        let seed = base64::engine::general_purpose::STANDARD.encode(bytes);
        let peer_id = blake3::hash(&bytes).to_hex().to_string();
        Self { seed, peer_id }
    }

    /// Use `seed` when given, otherwise generate a fresh identity.
    pub fn from_seed_or_generate(seed: Option<&str>) -> Result<Self> {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Ok(Self::generate()),
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

/// Owns the correlation table and the connection for one identity.
pub struct Session {
    transport: Arc<dyn Transport>,
    identity: Identity,
    ttl: Duration,
    correlator: Arc<Correlator>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, identity: Identity, ttl: Duration) -> Self {
        Self {
            transport,
            identity,
            ttl,
            correlator: Correlator::new(),
            connection: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Default TTL applied to requests that don't set one.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Peer id of the currently connected relay, if any.
    pub async fn relay_peer_id(&self) -> Option<String> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.relay_peer_id().to_string())
    }

    /// Return the connection to `relay`, establishing or replacing it as needed.
    ///
    /// Failing to replace a connection to a different relay is fatal.
    pub async fn connect(&self, relay: &Node) -> Result<Arc<dyn Connection>> {
        let mut slot = self.connection.lock().await;

        if let Some(existing) = slot.as_ref()
            && existing.relay_peer_id() == relay.peer_id
        {
            return Ok(Arc::clone(existing));
        }

        let sink: Arc<dyn EventSink> = self.correlator.clone();
        let connected = self.transport.connect(relay, &self.identity, sink).await;

        match (slot.take(), connected) {
            (None, Ok(conn)) => {
                info!(relay = %relay.peer_id, client = %self.identity.peer_id(), "connected to relay");
                *slot = Some(Arc::clone(&conn));
                Ok(conn)
            }
            (None, Err(e)) => Err(DistError::Connection {
                relay: relay.peer_id.clone(),
                reason: e.to_string(),
            }),
            (Some(previous), Ok(conn)) => {
                info!(
                    from = %previous.relay_peer_id(),
                    to = %relay.peer_id,
                    "switching relay connection"
                );
                if let Err(e) = previous.disconnect().await {
                    warn!(relay = %previous.relay_peer_id(), error = %e, "failed to close previous connection");
                }
                *slot = Some(Arc::clone(&conn));
                Ok(conn)
            }
            (Some(previous), Err(e)) => {
                let from = previous.relay_peer_id().to_string();
                *slot = Some(previous);
                Err(DistError::ConnectionSwap {
                    from,
                    to: relay.peer_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Disconnect and abandon pending requests. No-op if never connected.
    pub async fn close(&self) -> Result<()> {
        let previous = self.connection.lock().await.take();
        if let Some(conn) = previous {
            debug!(relay = %conn.relay_peer_id(), "closing session");
            self.correlator.clear();
            conn.disconnect().await?;
        }
        Ok(())
    }

    /// Submit `request` through `relay`.
    pub async fn submit(&self, relay: &Node, request: Request) -> Result<RequestHandle> {
        let connection = self.connect(relay).await?;
        self.correlator
            .submit(
                connection.as_ref(),
                self.identity.peer_id(),
                request,
                self.ttl,
            )
            .await
    }

    /// Submit a request-reply script and wait for its single callback.
    ///
    /// The script must report its result by calling `callback.callback`.
    pub async fn fetch(&self, relay: &Node, request: Request) -> Result<Vec<serde_json::Value>> {
        let request = request.expect_event(CALLBACK_SERVICE, CALLBACK_FUNCTION);
        let handle = self.submit(relay, request).await?;
        let particle_id = handle.particle_id().to_string();
        handle.wait().await?.into_args(&particle_id)
    }

    /// Like [`Session::fetch`], decoding the first callback argument as `T`.
    pub async fn fetch_one<T: DeserializeOwned>(&self, relay: &Node, request: Request) -> Result<T> {
        let request = request.expect_event(CALLBACK_SERVICE, CALLBACK_FUNCTION);
        let handle = self.submit(relay, request).await?;
        let particle_id = handle.particle_id().to_string();
        let mut args = handle.wait().await?.into_args(&particle_id)?;
        if args.is_empty() {
            return Err(DistError::UnexpectedResult {
                particle_id,
                reason: "callback carried no arguments".to_string(),
            });
        }
        serde_json::from_value(args.swap_remove(0)).map_err(|e| DistError::UnexpectedResult {
            particle_id,
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("ttl", &self.ttl)
            .field("pending", &self.correlator.pending_count())
            .finish_non_exhaustive()
    }
}
