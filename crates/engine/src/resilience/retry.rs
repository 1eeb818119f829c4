//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use ironfly_core::error::Result;

/// Retry policy applied inside the circuit breaker: up to
/// `max_attempts` tries with delays `base_delay · 2^(attempt−1)`,
/// retrying only recoverable errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Runs `f`, retrying recoverable failures.
    ///
    /// # Errors
    /// The last error once attempts are exhausted, or immediately for a
    /// non-recoverable error.
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        target: "ironfly::resilience",
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "attempt failed"
                    );
                    if !err.is_recoverable() || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.base_delay * 2u32.pow(attempt - 1);
                    tracing::debug!(
                        target: "ironfly::resilience",
                        operation,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
