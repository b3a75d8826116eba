//! Pending-operation table matching delivered events to submissions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::{EventHandler, EventKey, RETURN_SERVICE, Request, ResultMode};
use crate::error::{DistError, Result};
use crate::transport::{Connection, EventSink, Particle, ParticleEvent};
use crate::types::Variables;

/// How a request settled successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// A matching event arrived; carries its payload.
    Result(Vec<serde_json::Value>),
    /// The TTL ran out in multi-result mode.
    Expired,
}

impl Completion {
    /// Payload of a settled single-result request.
    pub fn into_args(self, particle_id: &str) -> Result<Vec<serde_json::Value>> {
        match self {
            Completion::Result(args) => Ok(args),
            Completion::Expired => Err(DistError::UnexpectedResult {
                particle_id: particle_id.to_string(),
                reason: "request expired without a result".to_string(),
            }),
        }
    }
}

type Settlement = Result<Completion>;

struct PendingOperation {
    handlers: HashMap<EventKey, Option<EventHandler>>,
    mode: ResultMode,
    deadline: Instant,
    done: oneshot::Sender<Settlement>,
}

/// Correlation table shared by every in-flight request of a session.
#[derive(Default)]
pub struct Correlator {
    pending: DashMap<String, PendingOperation>,
}

impl Correlator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of requests still waiting for an outcome.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, particle_id: &str) -> bool {
        self.pending.contains_key(particle_id)
    }

    /// Register `request` and send it over `connection`.
    ///
    /// Handlers are registered before the particle leaves, so a result that
    /// comes back immediately still finds its entry.
    pub async fn submit(
        self: &Arc<Self>,
        connection: &dyn Connection,
        init_peer_id: &str,
        request: Request,
        default_ttl: Duration,
    ) -> Result<RequestHandle> {
        let ttl = request.ttl.unwrap_or(default_ttl);
        let particle_id = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + ttl;

        let mut data = Variables::new();
        let relay = serde_json::Value::String(connection.relay_peer_id().to_string());
        data.insert("relay".to_string(), relay.clone());
        data.insert("init_relay".to_string(), relay);
        data.insert(
            "myPeerId".to_string(),
            serde_json::Value::String(init_peer_id.to_string()),
        );
        data.insert(
            RETURN_SERVICE.to_string(),
            serde_json::Value::String(RETURN_SERVICE.to_string()),
        );
        data.extend(request.variables);

        let (tx, rx) = oneshot::channel();
        let handlers: HashMap<_, _> = request.handlers.into_iter().collect();
        let events: Vec<String> = handlers.keys().map(ToString::to_string).collect();
        self.pending.insert(
            particle_id.clone(),
            PendingOperation {
                handlers,
                mode: request.mode,
                deadline,
                done: tx,
            },
        );
        debug!(particle_id = %particle_id, ?events, mode = ?request.mode, ?ttl, "registered request");

        let particle = Particle {
            id: particle_id.clone(),
            init_peer_id: init_peer_id.to_string(),
            script: request.script,
            data,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        if let Err(e) = connection.send(particle).await {
            self.pending.remove(&particle_id);
            return Err(e);
        }

        Ok(RequestHandle {
            particle_id,
            mode: request.mode,
            ttl,
            deadline,
            rx,
            correlator: Arc::clone(self),
            settled: false,
        })
    }

    /// Route a delivered event to its pending request.
    pub fn dispatch(&self, event: ParticleEvent) {
        let id = event.particle_id.clone();

        if EventKey::is_error(&event.service, &event.function) {
            // Past the deadline the waiter's expiry settles the request.
            let now = Instant::now();
            match self.pending.remove_if(&id, |_, op| now < op.deadline) {
                Some((_, op)) => {
                    let payload = error_payload(event.args);
                    warn!(particle_id = %id, %payload, "script execution failed");
                    let _ = op.done.send(Err(DistError::RemoteScript {
                        particle_id: id,
                        payload,
                    }));
                }
                None if self.pending.contains_key(&id) => {
                    debug!(particle_id = %id, "error arrived after deadline");
                }
                None => trace!(particle_id = %id, "error for unknown or settled request"),
            }
            return;
        }

        let key = EventKey::new(event.service.as_str(), event.function.as_str());
        let (handler, mode) = {
            let Some(op) = self.pending.get(&id) else {
                trace!(particle_id = %id, event = %key, "event for unknown or settled request");
                return;
            };
            if Instant::now() >= op.deadline {
                debug!(particle_id = %id, event = %key, "event arrived after deadline");
                return;
            }
            let Some(handler) = op.handlers.get(&key) else {
                debug!(particle_id = %id, event = %key, "no handler registered, ignoring");
                return;
            };
            (handler.clone(), op.mode)
        };

        match mode {
            ResultMode::Single => {
                // Whoever removes the entry first settles it.
                let Some((_, op)) = self.pending.remove(&id) else {
                    return;
                };
                trace!(particle_id = %id, event = %key, "settling request");
                if let Some(handler) = handler {
                    handler(&event);
                }
                let _ = op.done.send(Ok(Completion::Result(event.args)));
            }
            ResultMode::Multi => {
                trace!(particle_id = %id, event = %key, "streaming result");
                if let Some(handler) = handler {
                    handler(&event);
                }
            }
        }
    }

    /// Drop a request without settling it. Its waiter observes a cancellation.
    pub fn unregister(&self, particle_id: &str) -> bool {
        self.pending.remove(particle_id).is_some()
    }

    /// Abandon every pending request.
    pub fn clear(&self) {
        let n = self.pending.len();
        self.pending.clear();
        if n > 0 {
            debug!(abandoned = n, "cleared pending requests");
        }
    }

    fn take(&self, particle_id: &str) -> bool {
        self.pending.remove(particle_id).is_some()
    }
}

impl EventSink for Correlator {
    fn deliver(&self, event: ParticleEvent) {
        self.dispatch(event);
    }
}

fn error_payload(mut args: Vec<serde_json::Value>) -> serde_json::Value {
    match args.len() {
        0 => serde_json::Value::Null,
        1 => args.remove(0),
        _ => serde_json::Value::Array(args),
    }
}

/// Awaitable outcome of a submitted request.
///
/// Dropping the handle before it settles abandons the request: the entry is
/// removed from the table and later events for it are ignored.
pub struct RequestHandle {
    particle_id: String,
    mode: ResultMode,
    ttl: Duration,
    deadline: Instant,
    rx: oneshot::Receiver<Settlement>,
    correlator: Arc<Correlator>,
    settled: bool,
}

impl RequestHandle {
    pub fn particle_id(&self) -> &str {
        &self.particle_id
    }

    pub fn mode(&self) -> ResultMode {
        self.mode
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Wait until the request settles.
    ///
    /// Single-result requests fail with [`DistError::Timeout`] when the TTL
    /// runs out; multi-result requests complete with [`Completion::Expired`].
    pub async fn wait(mut self) -> Result<Completion> {
        let outcome = match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => Err(self.cancelled()),
            Err(_) => {
                if self.correlator.take(&self.particle_id) {
                    self.expired()
                } else {
                    // Settled concurrently with the deadline; the sender is
                    // about to deliver or has been dropped.
                    match (&mut self.rx).await {
                        Ok(settlement) => settlement,
                        Err(_) => Err(self.cancelled()),
                    }
                }
            }
        };
        self.settled = true;
        outcome
    }

    /// Abandon the request. Any in-flight remote work is no longer observed.
    pub fn cancel(mut self) {
        if self.correlator.unregister(&self.particle_id) {
            debug!(particle_id = %self.particle_id, "request cancelled");
        }
        self.settled = true;
    }

    fn expired(&self) -> Settlement {
        match self.mode {
            ResultMode::Multi => {
                debug!(particle_id = %self.particle_id, "request ttl expired");
                Ok(Completion::Expired)
            }
            ResultMode::Single => Err(DistError::Timeout {
                particle_id: self.particle_id.clone(),
                ttl: self.ttl,
            }),
        }
    }

    fn cancelled(&self) -> DistError {
        DistError::Cancelled {
            particle_id: self.particle_id.clone(),
        }
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        if !self.settled {
            self.correlator.unregister(&self.particle_id);
        }
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("particle_id", &self.particle_id)
            .field("mode", &self.mode)
            .field("ttl", &self.ttl)
            .finish()
    }
}
