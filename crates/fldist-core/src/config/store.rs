//! Config store for loading and saving fldist.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{FldistConfig, parser};

pub const CONFIG_FILE: &str = "fldist.toml";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store in the user's config directory.
    pub fn from_default_location() -> anyhow::Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("fldist");
        Ok(Self::from_path(dir.join(CONFIG_FILE)))
    }

    pub fn from_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// `explicit` when given, the default location otherwise.
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Ok(Self::from_path(path)),
            None => Self::from_default_location(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config; a missing file yields the defaults.
    pub fn load(&self) -> anyhow::Result<FldistConfig> {
        if !self.config_path.exists() {
            return Ok(FldistConfig::new());
        }
        parser::parse_fldist_toml(&self.config_path)
    }

    pub fn save(&self, config: &FldistConfig) -> anyhow::Result<()> {
        let content = parser::to_toml(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::from_path(dir.path().join("absent.toml"));
        assert_eq!(store.load().unwrap(), FldistConfig::default());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::from_path(dir.path().join("nested/fldist.toml"));
        let config = FldistConfig {
            ttl_ms: 5_000,
            ..FldistConfig::default()
        };
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap().ttl_ms, 5_000);
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fldist.toml");
        std::fs::write(&path, "ttl_ms = \"soon\"").unwrap();
        let err = ConfigStore::from_path(&path).load().unwrap_err();
        assert!(format!("{err:#}").contains("fldist.toml"));
    }
}
