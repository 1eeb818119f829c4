//! The resilience wrapper around every outbound venue call.
//!
//! Layering: circuit breaker outermost (fail fast while the venue is
//! known-bad), retry innermost (absorb transient faults). The breaker
//! records the post-retry outcome, so one `exec` contributes at most
//! one success or failure. Rate-limit errors are breaker-neutral: they
//! are back-pressure, not venue failure, and must not flip the circuit
//! either way.

pub mod circuit_breaker;
pub mod retry;

use std::future::Future;
use std::sync::Arc;

use ironfly_core::error::Result;

use self::circuit_breaker::CircuitBreaker;
use self::retry::RetryPolicy;

/// Shared wrapper; one instance per process, cloned into every
/// component that talks to the venue.
#[derive(Clone)]
pub struct Resilience {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Resilience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resilience")
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Resilience {
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self { breaker, retry }
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Executes one venue operation under retry + circuit breaker.
    ///
    /// # Errors
    /// `CircuitOpen` when the breaker refuses the call, otherwise the
    /// last error from the retried operation.
    pub async fn exec<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker.acquire(operation)?;

        let result = self.retry.run(operation, f).await;
        match &result {
            Ok(_) => self.breaker.record_success(operation),
            Err(err) if err.is_rate_limit() => {
                tracing::debug!(
                    target: "ironfly::resilience",
                    operation,
                    "rate limited; not counted against the circuit"
                );
            }
            Err(_) => self.breaker.record_failure(operation),
        }
        result
    }
}
