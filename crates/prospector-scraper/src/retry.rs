//! Bounded retry with linear backoff.

use prospector_core::ScrapingConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retries a fallible async operation a fixed number of times.
///
/// The delay before retry `n` (1-based) is `base_delay * n`. Once the
/// attempts are used up the error of the last attempt is returned as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryStrategy {
    /// Create a strategy. `max_attempts` is raised to 1 if zero.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Strategy for a run's industry scrapes.
    #[must_use]
    pub fn from_config(config: &ScrapingConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    /// Total attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep before retry `n` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    /// Run `operation` until it succeeds or the attempts are exhausted.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_with(|_| operation()).await
    }

    /// Like [`execute`](Self::execute), passing the 1-based attempt number.
    pub async fn execute_with<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    error!(attempts = attempt, "giving up: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}...",
                        attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::from_config(&ScrapingConfig::default())
    }
}
