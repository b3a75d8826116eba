//! Declarative application deployment.

pub mod deployer;
pub mod loader;
pub mod spec;
pub mod template;

pub use deployer::{AppDeployer, AppReport, service_variables};
pub use loader::{Loader, Source};
pub use spec::{AppSpec, ModuleSpec, ScriptSpec, ServiceSpec, StoredScriptSpec};
