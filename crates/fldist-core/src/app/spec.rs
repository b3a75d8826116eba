//! Declarative application document.
//!
//! The same structure is read as input and written back as output, with the
//! identifiers assigned during deployment filled in.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::loader::Source;
use crate::deploy::catalog::is_hash_reference;
use crate::distributor::MIN_SCRIPT_INTERVAL_SECS;
use crate::error::{DistError, Result};
use crate::types::{ModuleConfig, ModuleConfigArgs, Variables};

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

fn default_interval() -> u64 {
    MIN_SCRIPT_INTERVAL_SECS
}

/// A service to instantiate on `node` from the listed modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Peer id of the target node.
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Keys of `modules`, or `hash:<hex>` references, in load order.
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hash_dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// WASI settings of a declared module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpecConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mounted_binaries: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preopened_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_dirs: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    #[serde(default)]
    pub config: ModuleSpecConfig,
    /// Content hash from a previous deployment. Set modules are not uploaded again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ModuleSpec {
    pub fn source(&self, name: &str) -> Result<Source> {
        Source::from_parts(self.file.as_deref(), self.url.as_ref(), name)
    }

    /// Module config named after the document key.
    pub fn module_config(&self, name: &str) -> ModuleConfig {
        ModuleConfig::from(ModuleConfigArgs {
            name: name.to_string(),
            mounted_binaries: self.config.mounted_binaries.clone(),
            preopened_files: self.config.preopened_files.clone(),
            mapped_dirs: self.config.mapped_dirs.clone(),
        })
    }
}

/// A script run once after all services exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub variables: Variables,
    /// Peer id bound to `node`; defaults to the relay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl ScriptSpec {
    pub fn source(&self, name: &str) -> Result<Source> {
        Source::from_parts(self.file.as_deref(), self.url.as_ref(), name)
    }
}

/// A script stored on a node for periodic execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredScriptSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    pub node: String,
    /// Seconds between runs.
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StoredScriptSpec {
    pub fn source(&self, name: &str) -> Result<Source> {
        Source::from_parts(self.file.as_deref(), self.url.as_ref(), name)
    }
}

/// Root of the deployment document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    pub services: IndexMap<String, ServiceSpec>,
    pub modules: IndexMap<String, ModuleSpec>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub scripts: IndexMap<String, ScriptSpec>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub script_storage: IndexMap<String, StoredScriptSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
}

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    let valid = IDENTIFIER
        .as_ref()
        .map(|re| re.is_match(name))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(DistError::InvalidSpec(format!(
            "{kind} name '{name}' must be an identifier (letters, digits, '_')"
        )))
    }
}

impl AppSpec {
    pub fn from_json(text: &str) -> Result<Self> {
        let spec: AppSpec = serde_json::from_str(text)
            .map_err(|e| DistError::InvalidSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DistError::Load {
                source_ref: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check names, sources, dependencies and intervals.
    pub fn validate(&self) -> Result<()> {
        for (name, module) in &self.modules {
            check_identifier("module", name)?;
            if module.hash.is_none() {
                module.source(name)?;
            }
        }
        for (name, service) in &self.services {
            check_identifier("service", name)?;
            if service.node.is_empty() {
                return Err(DistError::InvalidSpec(format!(
                    "service '{name}' has no target node"
                )));
            }
            if let Some(dep) = service
                .dependencies
                .iter()
                .find(|dep| !is_hash_reference(dep) && !self.modules.contains_key(*dep))
            {
                return Err(DistError::MissingDependency {
                    module: dep.clone(),
                    blueprint: name.clone(),
                });
            }
        }
        for (name, script) in &self.scripts {
            check_identifier("script", name)?;
            script.source(name)?;
        }
        for (name, script) in &self.script_storage {
            check_identifier("script", name)?;
            script.source(name)?;
            if script.interval < MIN_SCRIPT_INTERVAL_SECS {
                return Err(DistError::InvalidSpec(format!(
                    "script '{name}' interval must be at least {MIN_SCRIPT_INTERVAL_SECS} seconds"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "services": {
            "history": { "node": "12D3KooWnode", "alias": "hist", "dependencies": ["sqlite3", "history"] }
        },
        "modules": {
            "sqlite3": { "url": "https://example.com/sqlite3.wasm" },
            "history": { "file": "history.wasm", "config": { "preopened_files": ["/tmp"] } }
        },
        "scripts": {
            "init": { "file": "init.air", "variables": { "limit": 10 } }
        },
        "script_storage": {
            "poll": { "file": "poll.air", "node": "12D3KooWnode", "interval": 10 }
        }
    }"#;

    #[test]
    fn parses_and_keeps_declaration_order() {
        let spec = AppSpec::from_json(DOC).unwrap();
        let services: Vec<_> = spec.services.keys().collect();
        assert_eq!(services, ["history"]);
        let modules: Vec<_> = spec.modules.keys().collect();
        assert_eq!(modules, ["sqlite3", "history"]);
        assert_eq!(spec.script_storage["poll"].interval, 10);
        assert!(spec.modules["history"].module_config("history").wasi.preopened_files.contains("/tmp"));
    }

    #[test]
    fn interval_defaults_to_minimum() {
        let doc = r#"{"services":{},"modules":{},"script_storage":{"s":{"file":"s.air","node":"n"}}}"#;
        let spec = AppSpec::from_json(doc).unwrap();
        assert_eq!(spec.script_storage["s"].interval, MIN_SCRIPT_INTERVAL_SECS);
    }

    #[test]
    fn rejects_short_interval() {
        let doc = r#"{"services":{},"modules":{},"script_storage":{"s":{"file":"s.air","node":"n","interval":1}}}"#;
        assert!(matches!(AppSpec::from_json(doc), Err(DistError::InvalidSpec(_))));
    }

    #[test]
    fn rejects_unknown_module_dependency() {
        let doc = r#"{"services":{"svc":{"node":"n","dependencies":["ghost"]}},"modules":{}}"#;
        assert!(matches!(
            AppSpec::from_json(doc),
            Err(DistError::MissingDependency { .. })
        ));
    }

    #[test]
    fn hash_dependencies_need_no_module() {
        let doc = r#"{"services":{"svc":{"node":"n","dependencies":["hash:abc"]}},"modules":{}}"#;
        assert!(AppSpec::from_json(doc).is_ok());
    }

    #[test]
    fn rejects_bad_names_and_sources() {
        let bad_name = r#"{"services":{},"modules":{"my-mod":{"file":"m.wasm"}}}"#;
        assert!(AppSpec::from_json(bad_name).is_err());
        let both = r#"{"services":{},"modules":{"m":{"file":"m.wasm","url":"https://x.y/m"}}}"#;
        assert!(AppSpec::from_json(both).is_err());
        let bad_url = r#"{"services":{},"modules":{"m":{"url":"not a url"}}}"#;
        assert!(AppSpec::from_json(bad_url).is_err());
    }

    #[test]
    fn output_omits_unset_fields() {
        let spec = AppSpec::from_json(DOC).unwrap();
        let value: serde_json::Value = serde_json::from_str(&spec.to_json().unwrap()).unwrap();
        assert!(value["services"]["history"].get("id").is_none());
        assert!(value.get("deployed_at").is_none());
    }
}
