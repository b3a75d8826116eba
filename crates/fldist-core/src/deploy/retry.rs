//! Bounded retry for idempotent uploads.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{DistError, Result};

/// Default number of attempts for module and blueprint uploads.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry policy applied uniformly to module and blueprint uploads.
///
/// Never used for service creation: repeating it would create a duplicate
/// service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `op` until it succeeds, fails with an error that is not
    /// [retryable](DistError::is_retryable_upload), or the attempt budget is
    /// spent.
    ///
    /// Exhaustion is reported as [`DistError::UploadFailed`] naming `artifact`
    /// and `node`. Other errors are returned unchanged.
    pub async fn run<T, F, Fut>(&self, artifact: &str, node: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable_upload() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(DistError::UploadFailed {
                        artifact: artifact.to_string(),
                        node: node.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(%artifact, %node, attempt, max_attempts, error = %e, "upload failed, retrying");
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
