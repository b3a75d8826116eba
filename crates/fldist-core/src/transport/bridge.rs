//! Transport backed by an external helper process.
//!
//! The helper owns the peer-to-peer stack. It is spawned once per connection
//! and speaks newline-delimited JSON over stdio: requests go to its stdin,
//! events come back on its stdout. Its stderr is inherited.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{Connection, EventSink, Particle, ParticleEvent, Transport};
use crate::error::{DistError, Result};
use crate::session::Identity;
use crate::types::Node;

/// How long the helper may take to report the relay connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Helper process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Messages written to the helper.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Connect {
        relay: &'a str,
        address: &'a str,
        seed: &'a str,
    },
    Particle {
        particle: &'a Particle,
    },
    Disconnect,
}

/// Messages read from the helper.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Connected {
        #[serde(default)]
        peer_id: Option<String>,
    },
    Event {
        event: ParticleEvent,
    },
    Error {
        message: String,
    },
}

fn encode(message: &Outbound<'_>) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

fn decode(line: &str) -> Result<Inbound> {
    serde_json::from_str(line)
        .map_err(|e| DistError::Transport(format!("malformed helper message: {e}")))
}

/// [`Transport`] that delegates the network to a helper process.
#[derive(Debug, Clone)]
pub struct BridgeTransport {
    config: BridgeConfig,
}

impl BridgeTransport {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        if config.command.trim().is_empty() {
            return Err(DistError::Config(
                "transport command is not configured".to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DistError::Transport(format!(
                    "failed to spawn transport helper '{}': {e}",
                    self.config.command
                ))
            })
    }
}

async fn await_connected(lines: &mut Lines<BufReader<ChildStdout>>, relay: &str) -> Result<()> {
    loop {
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| DistError::Transport("transport helper exited".to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        match decode(&line)? {
            Inbound::Connected { peer_id } => {
                if let Some(peer_id) = peer_id
                    && peer_id != relay
                {
                    warn!(expected = %relay, reported = %peer_id, "relay reported a different peer id");
                }
                return Ok(());
            }
            Inbound::Error { message } => return Err(DistError::Transport(message)),
            Inbound::Event { event } => {
                debug!(particle_id = %event.particle_id, "dropping event received before connect")
            }
        }
    }
}

fn forward_events(
    mut lines: Lines<BufReader<ChildStdout>>,
    sink: Arc<dyn EventSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("transport helper closed its output");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read from transport helper");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode(&line) {
                Ok(Inbound::Event { event }) => {
                    trace!(particle_id = %event.particle_id, service = %event.service, function = %event.function, "event received");
                    sink.deliver(event);
                }
                Ok(Inbound::Error { message }) => warn!(%message, "transport helper reported an error"),
                Ok(Inbound::Connected { .. }) => {}
                Err(e) => warn!(error = %e, "ignoring helper output"),
            }
        }
    })
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(
        &self,
        relay: &Node,
        identity: &Identity,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn Connection>> {
        let mut child = self.spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DistError::Transport("helper stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DistError::Transport("helper stdout unavailable".to_string()))?;

        let hello = encode(&Outbound::Connect {
            relay: &relay.peer_id,
            address: &relay.address,
            seed: identity.seed(),
        })?;
        stdin.write_all(&hello).await?;
        stdin.flush().await?;

        let mut lines = BufReader::new(stdout).lines();
        match tokio::time::timeout(CONNECT_TIMEOUT, await_connected(&mut lines, &relay.peer_id))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                child.kill().await.ok();
                return Err(e);
            }
            Err(_) => {
                child.kill().await.ok();
                return Err(DistError::Transport(format!(
                    "relay {} did not answer within {CONNECT_TIMEOUT:?}",
                    relay.peer_id
                )));
            }
        }

        let reader = forward_events(lines, sink);
        Ok(Arc::new(BridgeConnection {
            relay_peer_id: relay.peer_id.clone(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(child),
            reader,
        }))
    }
}

/// Connection owned by one helper process.
struct BridgeConnection {
    relay_peer_id: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    reader: JoinHandle<()>,
}

impl BridgeConnection {
    async fn write(&self, message: &Outbound<'_>) -> Result<()> {
        let line = encode(message)?;
        let mut stdin = self.stdin.lock().await;
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| DistError::Transport("connection is closed".to_string()))?;
        pipe.write_all(&line)
            .await
            .map_err(|e| DistError::Transport(format!("failed to write to helper: {e}")))?;
        pipe.flush()
            .await
            .map_err(|e| DistError::Transport(format!("failed to write to helper: {e}")))
    }
}

#[async_trait]
impl Connection for BridgeConnection {
    fn relay_peer_id(&self) -> &str {
        &self.relay_peer_id
    }

    async fn send(&self, particle: Particle) -> Result<()> {
        trace!(particle_id = %particle.id, relay = %self.relay_peer_id, "sending particle");
        self.write(&Outbound::Particle {
            particle: &particle,
        })
        .await
    }

    async fn disconnect(&self) -> Result<()> {
        if let Err(e) = self.write(&Outbound::Disconnect).await {
            debug!(error = %e, "helper already gone");
        }
        // Closing stdin lets the helper exit on its own.
        self.stdin.lock().await.take();
        self.reader.abort();
        let mut child = self.child.lock().await;
        if child.try_wait()?.is_none() {
            child.kill().await?;
        }
        Ok(())
    }
}

impl Drop for BridgeConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
