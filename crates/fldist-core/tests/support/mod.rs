//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fldist_core::distributor::NodeApi;
use fldist_core::error::{DistError, Result};
use fldist_core::session::Identity;
use fldist_core::transport::{Connection, EventSink, Particle, ParticleEvent, Transport};
use fldist_core::types::{Blueprint, Module, Node, Variables};

/// Computes the events a fake network sends back for a particle.
pub type Responder = Arc<dyn Fn(&Particle) -> Vec<ParticleEvent> + Send + Sync>;

#[derive(Default)]
struct TransportState {
    connects: Vec<String>,
    disconnects: Vec<String>,
    sent: Vec<Particle>,
    unreachable: HashSet<String>,
    failing_sends: usize,
    sink: Option<Arc<dyn EventSink>>,
}

/// In-memory transport that records everything and answers via a responder.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<TransportState>>,
    responder: Option<Responder>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every sent particle with the events `responder` returns.
    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&Particle) -> Vec<ParticleEvent> + Send + Sync + 'static,
    {
        Self {
            state: Arc::default(),
            responder: Some(Arc::new(responder)),
        }
    }

    /// Reply on `callback.callback` with the result of `reply`.
    pub fn callback<F>(reply: F) -> Self
    where
        F: Fn(&Particle) -> Vec<serde_json::Value> + Send + Sync + 'static,
    {
        Self::responding(move |p| {
            vec![ParticleEvent::new(p.id.clone(), "callback", "callback", reply(p))]
        })
    }

    pub fn set_unreachable(&self, peer_id: &str) {
        self.state
            .lock()
            .unwrap()
            .unreachable
            .insert(peer_id.to_string());
    }

    /// Make the next `n` sends fail with a transport error.
    pub fn fail_next_sends(&self, n: usize) {
        self.state.lock().unwrap().failing_sends = n;
    }

    pub fn connects(&self) -> Vec<String> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.state.lock().unwrap().disconnects.clone()
    }

    pub fn sent(&self) -> Vec<Particle> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn last_sent(&self) -> Particle {
        self.sent().pop().expect("no particle sent")
    }

    /// Push an event into the session as if the network delivered it.
    pub fn inject(&self, event: ParticleEvent) {
        let sink = self.state.lock().unwrap().sink.clone();
        sink.expect("not connected").deliver(event);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect(
        &self,
        relay: &Node,
        _identity: &Identity,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn Connection>> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(&relay.peer_id) {
            return Err(DistError::Transport(format!("{} unreachable", relay.peer_id)));
        }
        state.connects.push(relay.peer_id.clone());
        state.sink = Some(Arc::clone(&sink));
        Ok(Arc::new(RecordingConnection {
            relay: relay.peer_id.clone(),
            state: Arc::clone(&self.state),
            responder: self.responder.clone(),
            sink,
        }))
    }
}

struct RecordingConnection {
    relay: String,
    state: Arc<Mutex<TransportState>>,
    responder: Option<Responder>,
    sink: Arc<dyn EventSink>,
}

#[async_trait]
impl Connection for RecordingConnection {
    fn relay_peer_id(&self) -> &str {
        &self.relay
    }

    async fn send(&self, particle: Particle) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                return Err(DistError::Transport("send failed".into()));
            }
            state.sent.push(particle.clone());
        }
        if let Some(responder) = &self.responder {
            for event in responder(&particle) {
                self.sink.deliver(event);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .disconnects
            .push(self.relay.clone());
        Ok(())
    }
}

/// One recorded [`NodeApi`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UploadModule { node: String, module: String },
    AddBlueprint { node: String, name: String, dependencies: Vec<String> },
    CreateService { node: String, blueprint_id: String },
    AddAlias { node: String, service_id: String, alias: String },
    AddScript { node: String, script: String, interval: Option<u64> },
    RemoveScript { node: String, script_id: String },
    RunScript { node: String, script: String, variables: Variables },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    /// (module, node) -> remaining transient failures.
    upload_failures: HashMap<(String, String), u32>,
    /// Blueprint name -> service id to hand out.
    service_ids: HashMap<String, String>,
    blueprint_names: HashMap<String, String>,
    services_created: usize,
}

/// Scripted [`NodeApi`]: records calls and injects upload failures.
#[derive(Clone, Default)]
pub struct FakeNodeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeNodeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` uploads of `module` to `node` with a transport error.
    pub fn fail_uploads(&self, module: &str, node: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .upload_failures
            .insert((module.to_string(), node.to_string()), times);
    }

    /// Hand out `id` for services created from blueprint `name`.
    pub fn assign_service_id(&self, blueprint: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .service_ids
            .insert(blueprint.to_string(), id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn module_uploads(&self, module: &str, node: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::UploadModule { node: n, module: m } if m == module && n == node))
            .count()
    }

    pub fn total_module_uploads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::UploadModule { .. }))
            .count()
    }

    pub fn blueprint_uploads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::AddBlueprint { .. }))
            .count()
    }

    pub fn service_creations(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateService { node, blueprint_id } => Some((node, blueprint_id)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl NodeApi for FakeNodeApi {
    async fn upload_module(&self, node: &Node, module: &Module) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::UploadModule {
            node: node.peer_id.clone(),
            module: module.name().to_string(),
        });
        let key = (module.name().to_string(), node.peer_id.clone());
        if let Some(remaining) = state.upload_failures.get_mut(&key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(DistError::Transport("connection reset".into()));
        }
        Ok(format!("hash-{}", module.name()))
    }

    async fn add_blueprint(&self, node: &Node, blueprint: &Blueprint) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::AddBlueprint {
            node: node.peer_id.clone(),
            name: blueprint.name.clone(),
            dependencies: blueprint.dependencies.clone(),
        });
        let id = format!("bp-{}-{}", blueprint.name, node.peer_id);
        state.blueprint_names.insert(id.clone(), blueprint.name.clone());
        Ok(id)
    }

    async fn create_service(&self, node: &Node, blueprint_id: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CreateService {
            node: node.peer_id.clone(),
            blueprint_id: blueprint_id.to_string(),
        });
        state.services_created += 1;
        let assigned = state
            .blueprint_names
            .get(blueprint_id)
            .and_then(|name| state.service_ids.get(name))
            .cloned();
        Ok(assigned.unwrap_or_else(|| format!("svc-{}", state.services_created)))
    }

    async fn add_alias(&self, node: &Node, service_id: &str, alias: &str) -> Result<()> {
        self.state.lock().unwrap().calls.push(Call::AddAlias {
            node: node.peer_id.clone(),
            service_id: service_id.to_string(),
            alias: alias.to_string(),
        });
        Ok(())
    }

    async fn add_script(&self, node: &Node, script: &str, interval: Option<u64>) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::AddScript {
            node: node.peer_id.clone(),
            script: script.to_string(),
            interval,
        });
        Ok(format!("script-{}", state.calls.len()))
    }

    async fn remove_script(&self, node: &Node, script_id: &str) -> Result<()> {
        self.state.lock().unwrap().calls.push(Call::RemoveScript {
            node: node.peer_id.clone(),
            script_id: script_id.to_string(),
        });
        Ok(())
    }

    async fn run_script(
        &self,
        node: &Node,
        script: &str,
        variables: Variables,
    ) -> Result<Vec<serde_json::Value>> {
        self.state.lock().unwrap().calls.push(Call::RunScript {
            node: node.peer_id.clone(),
            script: script.to_string(),
            variables,
        });
        Ok(vec![serde_json::json!("ok")])
    }
}
