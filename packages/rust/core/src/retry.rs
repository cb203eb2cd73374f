//! Bounded retry with an explicit backoff schedule.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use tpsync_shared::{Result, RetryConfig};

/// Retry policy: one delay per permitted retry, applied in order.
///
/// `[2s, 5s]` means up to three attempts, sleeping 2s after the first
/// failure and 5s after the second. Only errors for which
/// [`TpsyncError::is_retryable`](tpsync_shared::TpsyncError::is_retryable)
/// holds are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(backoff: Vec<Duration>) -> Self {
        Self { backoff }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config
                .backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }

    pub fn max_retries(&self) -> usize {
        self.backoff.len()
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    /// Returns the last error in the latter two cases.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.backoff.len() => {
                    let delay = self.backoff[attempt];
                    attempt += 1;
                    warn!(
                        label,
                        attempt,
                        max_retries = self.backoff.len(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
