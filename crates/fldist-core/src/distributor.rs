//! Remote operations on nodes, built on the session's request correlation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::request::{RETURN_FUNCTION, RETURN_SERVICE, Request, RequestHandle};
use crate::scripts;
use crate::session::Session;
use crate::transport::ParticleEvent;
use crate::types::{Blueprint, Module, Node, Variables};

/// Lower bound for the execution period of stored scripts, in seconds.
pub const MIN_SCRIPT_INTERVAL_SECS: u64 = 3;

/// Operations the deployment pipelines need from the network.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Upload a module; returns the content hash the node assigned.
    async fn upload_module(&self, node: &Node, module: &Module) -> Result<String>;

    /// Register a blueprint; returns its id.
    async fn add_blueprint(&self, node: &Node, blueprint: &Blueprint) -> Result<String>;

    /// Instantiate a blueprint; returns the new service id.
    async fn create_service(&self, node: &Node, blueprint_id: &str) -> Result<String>;

    async fn add_alias(&self, node: &Node, service_id: &str, alias: &str) -> Result<()>;

    /// Store a script for periodic execution; returns its id.
    async fn add_script(&self, node: &Node, script: &str, interval_secs: Option<u64>)
    -> Result<String>;

    async fn remove_script(&self, node: &Node, script_id: &str) -> Result<()>;

    /// Run a one-shot script and wait for its first `returnService.run` result.
    async fn run_script(
        &self,
        node: &Node,
        script: &str,
        variables: Variables,
    ) -> Result<Vec<serde_json::Value>>;
}

/// [`NodeApi`] over a [`Session`].
///
/// Nodes with a known address are dialed directly; the others are reached
/// through the default relay.
#[derive(Debug, Clone)]
pub struct Distributor {
    session: Arc<Session>,
    relay: Node,
}

impl Distributor {
    pub fn new(session: Arc<Session>, relay: Node) -> Self {
        Self { session, relay }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn relay(&self) -> &Node {
        &self.relay
    }

    fn route<'a>(&'a self, node: &'a Node) -> &'a Node {
        if node.is_dialable() { node } else { &self.relay }
    }

    fn request(script: String, node: &Node) -> Result<Request> {
        Request::new(script).with_variable("node", &node.peer_id)
    }

    /// Modules present on `node`.
    pub async fn get_modules(&self, node: &Node) -> Result<serde_json::Value> {
        let request = Self::request(scripts::list_modules(), node)?;
        self.session.fetch_one(self.route(node), request).await
    }

    /// Services and their interfaces on `node`.
    pub async fn get_interfaces(&self, node: &Node) -> Result<serde_json::Value> {
        let request = Self::request(scripts::list_services(), node)?;
        self.session.fetch_one(self.route(node), request).await
    }

    /// Interface of one service.
    pub async fn get_interface(&self, node: &Node, service_id: &str) -> Result<serde_json::Value> {
        let request = Self::request(scripts::get_interface(), node)?
            .with_variable("service_id", service_id)?;
        self.session.fetch_one(self.route(node), request).await
    }

    /// Submit a script and stream every `returnService.run` result to
    /// `on_result` until the TTL expires or the script fails.
    pub async fn run_air<F>(
        &self,
        node: &Node,
        script: &str,
        variables: Variables,
        on_result: F,
    ) -> Result<RequestHandle>
    where
        F: Fn(&ParticleEvent) + Send + Sync + 'static,
    {
        let request = Self::request(script.to_string(), node)?
            .with_variables(variables)
            .on_event(RETURN_SERVICE, RETURN_FUNCTION, on_result)
            .multi_result();
        self.session.submit(self.route(node), request).await
    }
}

#[async_trait]
impl NodeApi for Distributor {
    async fn upload_module(&self, node: &Node, module: &Module) -> Result<String> {
        debug!(node = %node, module = %module.name(), size = module.bytes.len(), "uploading module");
        let request = Self::request(scripts::add_module(), node)?
            .with_variable("module_bytes", module.encoded_bytes())?
            .with_variable("module_config", &module.config)?;
        self.session.fetch_one(self.route(node), request).await
    }

    async fn add_blueprint(&self, node: &Node, blueprint: &Blueprint) -> Result<String> {
        info!(
            node = %node,
            blueprint = %blueprint.name,
            client = %self.session.identity().peer_id(),
            "uploading blueprint"
        );
        let mut definition = json!({
            "name": blueprint.name,
            "dependencies": blueprint.dependencies,
        });
        if let Some(id) = &blueprint.id {
            definition["id"] = json!(id);
        }
        let request =
            Self::request(scripts::add_blueprint(), node)?.with_variable("blueprint", definition)?;
        self.session.fetch_one(self.route(node), request).await
    }

    async fn create_service(&self, node: &Node, blueprint_id: &str) -> Result<String> {
        let request = Self::request(scripts::create_service(), node)?
            .with_variable("blueprint_id", blueprint_id)?;
        self.session.fetch_one(self.route(node), request).await
    }

    async fn add_alias(&self, node: &Node, service_id: &str, alias: &str) -> Result<()> {
        let request = Self::request(scripts::add_alias(), node)?
            .with_variable("alias", alias)?
            .with_variable("service_id", service_id)?;
        self.session.fetch(self.route(node), request).await?;
        Ok(())
    }

    async fn add_script(
        &self,
        node: &Node,
        script: &str,
        interval_secs: Option<u64>,
    ) -> Result<String> {
        let requested = interval_secs.unwrap_or(MIN_SCRIPT_INTERVAL_SECS);
        let interval = requested.max(MIN_SCRIPT_INTERVAL_SECS);
        if interval != requested {
            warn!(requested, interval, "script interval raised to the minimum");
        }
        let request = Self::request(scripts::add_script(), node)?
            .with_variable("script", script)?
            .with_variable("interval", interval.to_string())?;
        self.session.fetch_one(self.route(node), request).await
    }

    async fn remove_script(&self, node: &Node, script_id: &str) -> Result<()> {
        let request =
            Self::request(scripts::remove_script(), node)?.with_variable("script_id", script_id)?;
        self.session.fetch(self.route(node), request).await?;
        Ok(())
    }

    async fn run_script(
        &self,
        node: &Node,
        script: &str,
        variables: Variables,
    ) -> Result<Vec<serde_json::Value>> {
        let request = Self::request(script.to_string(), node)?
            .with_variables(variables)
            .expect_event(RETURN_SERVICE, RETURN_FUNCTION);
        let handle = self.session.submit(self.route(node), request).await?;
        let particle_id = handle.particle_id().to_string();
        handle.wait().await?.into_args(&particle_id)
    }
}
