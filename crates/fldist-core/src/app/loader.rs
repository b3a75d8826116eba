//! Artifact loading from local files and URLs.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;

use crate::error::{DistError, Result};
use crate::types::{ModuleConfig, ModuleConfigArgs};

/// Where artifact bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Path, relative to the loader root unless absolute.
    File(PathBuf),
    Url(Url),
}

impl Source {
    /// Exactly one of `file` and `url` must be given.
    pub fn from_parts(file: Option<&str>, url: Option<&Url>, entry: &str) -> Result<Self> {
        match (file, url) {
            (Some(file), None) => Ok(Source::File(PathBuf::from(file))),
            (None, Some(url)) => Ok(Source::Url(url.clone())),
            (Some(_), Some(_)) => Err(DistError::InvalidSpec(format!(
                "'{entry}' must set either 'file' or 'url', not both"
            ))),
            (None, None) => Err(DistError::InvalidSpec(format!(
                "'{entry}' must set 'file' or 'url'"
            ))),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Reads sources relative to a root directory.
#[derive(Debug, Clone)]
pub struct Loader {
    root: PathBuf,
    http: reqwest::Client,
}

impl Loader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            http: reqwest::Client::new(),
        }
    }

    fn load_error(source: &Source, reason: impl fmt::Display) -> DistError {
        DistError::Load {
            source_ref: source.to_string(),
            reason: reason.to_string(),
        }
    }

    pub async fn bytes(&self, source: &Source) -> Result<Vec<u8>> {
        match source {
            Source::File(path) => {
                let path = self.root.join(path);
                debug!(path = %path.display(), "reading artifact");
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| Self::load_error(source, e))
            }
            Source::Url(url) => {
                debug!(%url, "downloading artifact");
                let response = self
                    .http
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| Self::load_error(source, e))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Self::load_error(source, format!("HTTP {status}")));
                }
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Self::load_error(source, e))?;
                Ok(body.to_vec())
            }
        }
    }

    /// Load UTF-8 text, e.g. a script.
    pub async fn text(&self, source: &Source) -> Result<String> {
        let bytes = self.bytes(source).await?;
        String::from_utf8(bytes).map_err(|e| Self::load_error(source, e))
    }

    /// Load a JSON module config in its short form.
    pub async fn module_config(&self, source: &Source) -> Result<ModuleConfig> {
        let text = self.text(source).await?;
        let args: ModuleConfigArgs =
            serde_json::from_str(&text).map_err(|e| Self::load_error(source, e))?;
        Ok(args.into())
    }
}
