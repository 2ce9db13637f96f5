//! Retry with exponential backoff

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How many times a failed request is retried and how long to wait in between
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Backoff before retry number `attempt` (1-based): base, 2·base, 4·base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, or retries are exhausted. The last error is returned.
    pub async fn execute<F, Fut, T, E, R>(&self, operation: F, is_retryable: R) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt,
                        self.max_retries + 1,
                        e
                    );
                    debug!("Retrying after {}ms", delay.as_millis());
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
