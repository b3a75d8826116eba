//! Catalog-driven multi-node deployment.

pub mod cache;
pub mod catalog;
pub mod orchestrator;
pub mod retry;

pub use cache::{ArtifactKind, DeploymentCache};
pub use catalog::{Catalog, DistributionEntry};
pub use orchestrator::{DistributionOrchestrator, DistributionReport};
pub use retry::RetryPolicy;
