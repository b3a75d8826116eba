//! Idempotent placement of catalog blueprints onto nodes.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::cache::{ArtifactKind, DeploymentCache};
use super::catalog::{Catalog, DistributionEntry};
use super::retry::RetryPolicy;
use crate::distributor::NodeApi;
use crate::error::{DistError, Result};
use crate::types::{Blueprint, Node, Service};

/// Outcome of one [`DistributionOrchestrator::distribute`] call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DistributionReport {
    /// Module uploads performed (cache hits excluded).
    pub modules_uploaded: usize,
    /// Blueprint uploads performed (cache hits excluded).
    pub blueprints_uploaded: usize,
    /// Services created, in distribution order.
    pub services: Vec<Service>,
}

/// Places blueprints and their modules onto nodes, uploading each artifact at
/// most once per node and retrying transient upload failures.
///
/// The cache lives as long as the orchestrator, so re-running a partially
/// failed distribution on the same instance skips the completed uploads.
/// Service creation is never deduplicated nor retried.
#[derive(Debug)]
pub struct DistributionOrchestrator<A: NodeApi> {
    api: A,
    nodes: Vec<Node>,
    retry: RetryPolicy,
    cache: DeploymentCache,
}

impl<A: NodeApi> DistributionOrchestrator<A> {
    pub fn new(api: A, nodes: Vec<Node>) -> Self {
        Self {
            api,
            nodes,
            retry: RetryPolicy::default(),
            cache: DeploymentCache::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Check every entry before anything is uploaded.
    fn validate(&self, catalog: &Catalog, distribution: &[DistributionEntry]) -> Result<()> {
        for entry in distribution {
            let blueprint = catalog
                .blueprint(&entry.blueprint)
                .ok_or_else(|| DistError::BlueprintNotFound(entry.blueprint.clone()))?;
            catalog.resolve(blueprint)?;
            if let Some(&index) = entry.nodes.iter().find(|&&i| i >= self.nodes.len()) {
                return Err(DistError::NodeIndexOutOfRange {
                    index,
                    nodes: self.nodes.len(),
                    blueprint: entry.blueprint.clone(),
                });
            }
        }
        Ok(())
    }

    /// Deploy every entry of `distribution`, in order.
    ///
    /// Configuration errors abort before the first upload. Any failure after
    /// that aborts the run; completed uploads stay cached.
    pub async fn distribute(
        &mut self,
        catalog: &Catalog,
        distribution: &[DistributionEntry],
    ) -> Result<DistributionReport> {
        self.validate(catalog, distribution)?;

        let mut report = DistributionReport::default();
        for entry in distribution {
            // Presence checked by validate.
            let Some(blueprint) = catalog.blueprint(&entry.blueprint) else {
                return Err(DistError::BlueprintNotFound(entry.blueprint.clone()));
            };
            for &index in &entry.nodes {
                let node = self.nodes[index].clone();
                let service = self.deploy_to(catalog, blueprint, &node, &mut report).await?;
                report.services.push(service);
            }
        }
        info!(
            services = report.services.len(),
            modules = report.modules_uploaded,
            blueprints = report.blueprints_uploaded,
            "distribution finished"
        );
        Ok(report)
    }

    async fn deploy_to(
        &mut self,
        catalog: &Catalog,
        blueprint: &Blueprint,
        node: &Node,
        report: &mut DistributionReport,
    ) -> Result<Service> {
        for module in catalog.resolve(blueprint)? {
            let name = module.name();
            if self.cache.has_uploaded(node, ArtifactKind::Module, name) {
                debug!(node = %node, module = %name, "module already uploaded");
                continue;
            }
            let api = &self.api;
            let hash = self
                .retry
                .run(&format!("module '{name}'"), &node.peer_id, || {
                    api.upload_module(node, module)
                })
                .await?;
            info!(node = %node, module = %name, %hash, "module uploaded");
            self.cache.mark_uploaded(node, ArtifactKind::Module, name, hash);
            report.modules_uploaded += 1;
        }

        let cached = self
            .cache
            .assigned_id(node, ArtifactKind::Blueprint, &blueprint.name)
            .map(str::to_string);
        let blueprint_id = match cached {
            Some(id) => {
                debug!(node = %node, blueprint = %blueprint.name, "blueprint already uploaded");
                id
            }
            None => {
                let api = &self.api;
                let assigned = self
                    .retry
                    .run(&format!("blueprint '{}'", blueprint.name), &node.peer_id, || {
                        api.add_blueprint(node, blueprint)
                    })
                    .await?;
                if let Some(predefined) = &blueprint.id
                    && predefined != &assigned
                {
                    warn!(
                        node = %node,
                        blueprint = %blueprint.name,
                        expected = %predefined,
                        assigned = %assigned,
                        "node assigned a different blueprint id, using the assigned one"
                    );
                }
                info!(node = %node, blueprint = %blueprint.name, id = %assigned, "blueprint uploaded");
                self.cache
                    .mark_uploaded(node, ArtifactKind::Blueprint, &blueprint.name, &assigned);
                report.blueprints_uploaded += 1;
                assigned
            }
        };

        let service_id = self.api.create_service(node, &blueprint_id).await?;
        info!(node = %node, blueprint = %blueprint.name, service = %service_id, "service created");
        Ok(Service {
            id: service_id,
            blueprint_id,
            node: node.clone(),
            alias: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::types::{Module, ModuleConfig, Variables};

    /// Counts calls per operation; uploads of `flaky` fail on the first call.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        flaky: Option<String>,
    }

    impl Recorder {
        fn count(&self, prefix: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    #[async_trait]
    impl NodeApi for Recorder {
        async fn upload_module(&self, node: &Node, module: &Module) -> Result<String> {
            let call = format!("module:{}@{}", module.name(), node.peer_id);
            let mut calls = self.calls.lock().unwrap();
            let first = !calls.contains(&call);
            calls.push(call);
            if first && self.flaky.as_deref() == Some(module.name()) {
                return Err(DistError::Transport("reset".into()));
            }
            Ok(format!("hash-{}", module.name()))
        }

        async fn add_blueprint(&self, node: &Node, blueprint: &Blueprint) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("blueprint:{}@{}", blueprint.name, node.peer_id));
            Ok(format!("bp-{}", blueprint.name))
        }

        async fn create_service(&self, node: &Node, blueprint_id: &str) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(format!("service:{blueprint_id}@{}", node.peer_id));
            Ok(format!("svc-{}", calls.len()))
        }

        async fn add_alias(&self, _: &Node, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn add_script(&self, _: &Node, _: &str, _: Option<u64>) -> Result<String> {
            Ok("script".into())
        }

        async fn remove_script(&self, _: &Node, _: &str) -> Result<()> {
            Ok(())
        }

        async fn run_script(&self, _: &Node, _: &str, _: Variables) -> Result<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(
            [
                Blueprint::new("B1", ["m1"]),
                Blueprint::new("B2", ["m1", "m2"]).with_id("predefined"),
            ],
            [
                Module::new(vec![1], ModuleConfig::new("m1")),
                Module::new(vec![2], ModuleConfig::new("m2")),
            ],
        )
        .unwrap()
    }

    fn nodes() -> Vec<Node> {
        vec![Node::peer("n0"), Node::peer("n1")]
    }

    #[tokio::test]
    async fn shared_module_is_uploaded_once_per_node() {
        let mut orchestrator = DistributionOrchestrator::new(Recorder::default(), nodes());
        let distribution = [
            DistributionEntry::new("B1", [0]),
            DistributionEntry::new("B2", [0]),
        ];
        let report = orchestrator.distribute(&catalog(), &distribution).await.unwrap();

        assert_eq!(orchestrator.api().count("module:m1@n0"), 1);
        assert_eq!(report.modules_uploaded, 2);
        assert_eq!(report.blueprints_uploaded, 2);
        assert_eq!(report.services.len(), 2);
    }

    #[tokio::test]
    async fn services_are_created_for_every_request() {
        let mut orchestrator = DistributionOrchestrator::new(Recorder::default(), nodes());
        let distribution = [DistributionEntry::new("B1", [0, 0])];
        let report = orchestrator.distribute(&catalog(), &distribution).await.unwrap();

        assert_eq!(orchestrator.api().count("blueprint:"), 1);
        assert_eq!(orchestrator.api().count("service:"), 2);
        assert_ne!(report.services[0].id, report.services[1].id);
    }

    #[tokio::test]
    async fn validation_happens_before_uploads() {
        let mut orchestrator = DistributionOrchestrator::new(Recorder::default(), nodes());
        let distribution = [
            DistributionEntry::new("B1", [0]),
            DistributionEntry::new("B1", [5]),
        ];
        let err = orchestrator
            .distribute(&catalog(), &distribution)
            .await
            .unwrap_err();
        assert!(matches!(err, DistError::NodeIndexOutOfRange { index: 5, nodes: 2, .. }));
        assert!(orchestrator.api().calls.lock().unwrap().is_empty());

        let err = orchestrator
            .distribute(&catalog(), &[DistributionEntry::new("nope", [0])])
            .await
            .unwrap_err();
        assert!(matches!(err, DistError::BlueprintNotFound(_)));
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let api = Recorder {
            flaky: Some("m2".into()),
            ..Recorder::default()
        };
        let mut orchestrator = DistributionOrchestrator::new(api, nodes());
        orchestrator
            .distribute(&catalog(), &[DistributionEntry::new("B2", [1])])
            .await
            .unwrap();
        assert_eq!(orchestrator.api().count("module:m2@n1"), 2);
    }

    #[tokio::test]
    async fn mismatched_blueprint_id_is_not_fatal() {
        let mut orchestrator = DistributionOrchestrator::new(Recorder::default(), nodes());
        let report = orchestrator
            .distribute(&catalog(), &[DistributionEntry::new("B2", [0])])
            .await
            .unwrap();
        assert_eq!(report.services[0].blueprint_id, "bp-B2");
    }
}
