//! Bounded retry with exponential backoff for idempotent reads.
//!
//! Writes are never routed through here: a create that timed out may still have been applied,
//! and repeating it would produce exactly the duplicates the sync tooling exists to clean up.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::Result;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; `1` disables retrying.
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from the base.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    let delay = self.backoff_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        attempts,
                        delay,
                        err
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
