//! Static catalog of blueprints and modules, plus the distribution map.
//!
//! ```toml
//! [[module]]
//! file = "artifacts/sqlite3.wasm"
//! name = "sqlite3"
//!
//! [[module]]
//! file = "artifacts/history.wasm"
//! config = "artifacts/history_cfg.json"
//!
//! [[blueprint]]
//! name = "history"
//! dependencies = ["sqlite3", "history"]
//!
//! [[distribution]]
//! blueprint = "history"
//! nodes = [0, 1]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::app::loader::{Loader, Source};
use crate::error::{DistError, Result};
use crate::types::{Blueprint, Module, ModuleConfig};

/// Dependency prefix for modules already present on the target by content hash.
pub const HASH_PREFIX: &str = "hash:";

/// Whether a dependency names an already satisfied module by hash.
pub fn is_hash_reference(dependency: &str) -> bool {
    dependency.starts_with(HASH_PREFIX)
}

/// One entry of the distribution map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DistributionEntry {
    pub blueprint: String,
    /// Indices into the node list, processed in order.
    pub nodes: Vec<usize>,
}

impl DistributionEntry {
    pub fn new(blueprint: impl Into<String>, nodes: impl Into<Vec<usize>>) -> Self {
        Self {
            blueprint: blueprint.into(),
            nodes: nodes.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    file: PathBuf,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "blueprint")]
    blueprints: Vec<Blueprint>,
    #[serde(default, rename = "module")]
    modules: Vec<ModuleEntry>,
    #[serde(default, rename = "distribution")]
    distribution: Vec<DistributionEntry>,
}

/// Blueprints by name and modules by config name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    blueprints: IndexMap<String, Blueprint>,
    modules: HashMap<String, Module>,
}

impl Catalog {
    /// Build a catalog; names must be unique per kind.
    pub fn new(
        blueprints: impl IntoIterator<Item = Blueprint>,
        modules: impl IntoIterator<Item = Module>,
    ) -> Result<Self> {
        let mut catalog = Self::default();
        for blueprint in blueprints {
            if catalog.blueprints.contains_key(&blueprint.name) {
                return Err(DistError::Config(format!(
                    "blueprint '{}' is defined twice",
                    blueprint.name
                )));
            }
            catalog.blueprints.insert(blueprint.name.clone(), blueprint);
        }
        for module in modules {
            let name = module.name().to_string();
            if catalog.modules.insert(name.clone(), module).is_some() {
                return Err(DistError::Config(format!("module '{name}' is defined twice")));
            }
        }
        Ok(catalog)
    }

    pub fn blueprint(&self, name: &str) -> Option<&Blueprint> {
        self.blueprints.get(name)
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Resolve a blueprint's dependencies to catalog modules, skipping hash
    /// references.
    pub fn resolve(&self, blueprint: &Blueprint) -> Result<Vec<&Module>> {
        blueprint
            .dependencies
            .iter()
            .filter(|dep| !is_hash_reference(dep))
            .map(|dep| {
                self.module(dep).ok_or_else(|| DistError::MissingDependency {
                    module: dep.clone(),
                    blueprint: blueprint.name.clone(),
                })
            })
            .collect()
    }

    /// Load a catalog file. Module paths are relative to the file's directory.
    pub async fn load(path: &Path) -> Result<(Self, Vec<DistributionEntry>)> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DistError::Load {
                source_ref: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let file: CatalogFile = toml::from_str(&content)?;
        let root = path.parent().unwrap_or_else(|| Path::new("."));
        let loader = Loader::new(root);

        let mut modules = Vec::with_capacity(file.modules.len());
        for entry in file.modules {
            let config = match (entry.config, entry.name) {
                (Some(config), _) => loader.module_config(&Source::File(config)).await?,
                (None, Some(name)) => ModuleConfig::new(name),
                (None, None) => {
                    return Err(DistError::Config(format!(
                        "module '{}' needs a name or a config file",
                        entry.file.display()
                    )));
                }
            };
            let bytes = loader.bytes(&Source::File(entry.file)).await?;
            debug!(module = %config.name, size = bytes.len(), "catalog module loaded");
            modules.push(Module::new(bytes, config));
        }

        let catalog = Self::new(file.blueprints, modules)?;
        Ok((catalog, file.distribution))
    }
}
