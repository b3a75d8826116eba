//! Deploys an [`AppSpec`] and records the assigned identifiers in it.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use super::loader::Loader;
use super::spec::AppSpec;
use super::template;
use crate::deploy::cache::{ArtifactKind, DeploymentCache};
use crate::deploy::catalog::{HASH_PREFIX, is_hash_reference};
use crate::deploy::retry::RetryPolicy;
use crate::distributor::NodeApi;
use crate::error::{DistError, Result};
use crate::types::{Blueprint, Module, Node, Script, Variables};

/// Suffix of the variable holding a service's node.
pub const NODE_SUFFIX: &str = "__node";

/// `name` -> service id and `name__node` -> node peer id, for every
/// deployed service.
pub fn service_variables(spec: &AppSpec) -> Variables {
    let mut variables = Variables::new();
    for (name, service) in &spec.services {
        if let Some(id) = &service.id {
            variables.insert(name.clone(), id.clone().into());
        }
        variables.insert(format!("{name}{NODE_SUFFIX}"), service.node.clone().into());
    }
    variables
}

/// What a deployment did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppReport {
    pub modules_uploaded: usize,
    pub services_created: usize,
    pub scripts_run: usize,
    /// Rendered stored scripts with their assigned ids.
    pub stored_scripts: Vec<Script>,
}

/// Runs the fixed stage order: per service modules, blueprint, service and
/// alias; then one-shot scripts in order; then stored scripts.
#[derive(Debug)]
pub struct AppDeployer<A: NodeApi> {
    api: A,
    loader: Loader,
    relay: Node,
    nodes: Vec<Node>,
    retry: RetryPolicy,
}

impl<A: NodeApi> AppDeployer<A> {
    /// `relay` is the target of scripts that name no node.
    pub fn new(api: A, loader: Loader, relay: Node) -> Self {
        Self {
            api,
            loader,
            relay,
            nodes: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Known nodes, used to look up addresses for the peer ids in a document.
    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn node(&self, peer_id: &str) -> Node {
        self.nodes
            .iter()
            .find(|n| n.peer_id == peer_id)
            .cloned()
            .unwrap_or_else(|| Node::peer(peer_id))
    }

    /// Deploy `spec` in place, filling in hashes and ids.
    pub async fn deploy(&self, spec: &mut AppSpec) -> Result<AppReport> {
        spec.validate()?;
        let mut report = AppReport::default();
        let mut cache = DeploymentCache::new();

        // Modules hashed by an earlier deployment are already on their nodes.
        let presatisfied: HashSet<String> = spec
            .modules
            .iter()
            .filter(|(_, m)| m.hash.is_some())
            .map(|(name, _)| name.clone())
            .collect();

        for (name, service) in spec.services.iter_mut() {
            let node = self.node(&service.node);
            info!(service = %name, node = %node, "deploying service");

            let mut hash_dependencies = Vec::with_capacity(service.dependencies.len());
            for dep in &service.dependencies {
                if is_hash_reference(dep) {
                    hash_dependencies.push(dep.clone());
                    continue;
                }
                let module = spec.modules.get_mut(dep).ok_or_else(|| {
                    DistError::MissingDependency {
                        module: dep.clone(),
                        blueprint: name.clone(),
                    }
                })?;

                let cached = cache
                    .assigned_id(&node, ArtifactKind::Module, dep)
                    .map(str::to_string);
                let previous = module
                    .hash
                    .clone()
                    .filter(|_| presatisfied.contains(dep));
                let hash = match (cached, previous) {
                    (Some(hash), _) => hash,
                    (None, Some(hash)) => {
                        debug!(module = %dep, %hash, "module already deployed");
                        hash
                    }
                    (None, None) => {
                        let source = module.source(dep)?;
                        let bytes = self.loader.bytes(&source).await?;
                        let artifact = Module::new(bytes, module.module_config(dep));
                        let api = &self.api;
                        let hash = self
                            .retry
                            .run(&format!("module '{dep}'"), &node.peer_id, || {
                                api.upload_module(&node, &artifact)
                            })
                            .await?;
                        info!(module = %dep, node = %node, %hash, "module uploaded");
                        cache.mark_uploaded(&node, ArtifactKind::Module, dep, &hash);
                        module.hash = Some(hash.clone());
                        report.modules_uploaded += 1;
                        hash
                    }
                };
                hash_dependencies.push(format!("{HASH_PREFIX}{hash}"));
            }

            let blueprint = Blueprint::new(name.clone(), hash_dependencies.clone());
            let api = &self.api;
            let blueprint_id = self
                .retry
                .run(&format!("blueprint '{name}'"), &node.peer_id, || {
                    api.add_blueprint(&node, &blueprint)
                })
                .await?;
            info!(service = %name, blueprint = %blueprint_id, "blueprint uploaded");

            let service_id = self.api.create_service(&node, &blueprint_id).await?;
            info!(service = %name, id = %service_id, node = %node, "service created");

            if let Some(alias) = &service.alias {
                self.api.add_alias(&node, &service_id, alias).await?;
                debug!(service = %name, %alias, "alias registered");
            }

            service.hash_dependencies = hash_dependencies;
            service.blueprint_id = Some(blueprint_id);
            service.id = Some(service_id);
            report.services_created += 1;
        }

        let variables = service_variables(spec);

        for (name, script) in &spec.scripts {
            info!(script = %name, "running script");
            let text = self.loader.text(&script.source(name)?).await?;
            let mut vars = variables.clone();
            vars.extend(script.variables.clone());
            let run = Script::new(name.as_str(), text).with_variables(vars);
            let target = script
                .node
                .as_deref()
                .map(|peer| self.node(peer))
                .unwrap_or_else(|| self.relay.clone());
            let result = self.api.run_script(&target, &run.content, run.variables).await?;
            info!(script = %name, result = %serde_json::Value::Array(result), "script finished");
            report.scripts_run += 1;
        }

        for (name, script) in spec.script_storage.iter_mut() {
            let text = self.loader.text(&script.source(name)?).await?;
            let mut stored = Script::new(name.as_str(), template::render(&text, &variables)?)
                .with_interval(script.interval);
            let node = self.node(&script.node);
            let id = self
                .api
                .add_script(&node, &stored.content, stored.interval_secs)
                .await?;
            info!(script = %name, %id, node = %node, interval = script.interval, "script stored");
            script.id = Some(id.clone());
            stored.id = Some(id);
            report.stored_scripts.push(stored);
        }

        spec.deployed_at = Some(Utc::now());
        Ok(report)
    }

    /// Deploy the document at `input`; write the resolved document to `output`.
    ///
    /// Artifact paths resolve against the loader root, normally the directory
    /// of `input`.
    pub async fn deploy_file(&self, input: &Path, output: &Path) -> Result<(AppSpec, AppReport)> {
        let mut spec = AppSpec::load(input).await?;
        let report = self.deploy(&mut spec).await?;
        tokio::fs::write(output, spec.to_json()?).await?;
        info!(output = %output.display(), "deployment written");
        Ok((spec, report))
    }
}
