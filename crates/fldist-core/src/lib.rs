//! fldist Core Library
//!
//! Deploys modules, blueprints, services and scripts onto network peers and
//! correlates asynchronously delivered script results with their requests.

pub mod app;
pub mod config;
pub mod deploy;
pub mod distributor;
pub mod error;
pub mod request;
pub mod scripts;
pub mod session;
pub mod transport;
pub mod types;

/// Re-exports of commonly used types
pub mod prelude {
    // Errors
    pub use crate::error::{DistError, Result};

    // Artifacts
    pub use crate::types::{
        Blueprint, Module, ModuleConfig, ModuleConfigArgs, Node, Script, Service, Variables,
        WasiConfig,
    };

    // Session and correlation
    pub use crate::request::{Completion, Correlator, EventKey, Request, RequestHandle, ResultMode};
    pub use crate::session::{Identity, Session};
    pub use crate::transport::{
        BridgeConfig, BridgeTransport, Connection, EventSink, Particle, ParticleEvent, Transport,
    };

    // Remote operations
    pub use crate::distributor::{Distributor, NodeApi};

    // Deployment
    pub use crate::app::{AppDeployer, AppReport, AppSpec, Loader, Source};
    pub use crate::deploy::{
        Catalog, DeploymentCache, DistributionEntry, DistributionOrchestrator, DistributionReport,
        RetryPolicy,
    };

    // Configuration
    pub use crate::config::{ConfigStore, Environment, FldistConfig};
}
