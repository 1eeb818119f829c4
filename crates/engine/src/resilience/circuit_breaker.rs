//! Three-state circuit breaker protecting the venue from a failing
//! client and the client from a failing venue.
//!
//! States: `Closed` (normal) → `Open` (fail fast) → `HalfOpen`
//! (probing) → `Closed`. The state lives in an atomic; timestamps sit
//! behind a short mutex because they are only touched on transitions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use ironfly_core::error::{EngineError, Result};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed = 0,
    /// Circuit tripped, calls fail fast.
    Open = 1,
    /// Testing whether the venue recovered.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive-ish failures before the circuit opens.
    pub failure_threshold: u32,
    /// Successes required in `HalfOpen` before closing.
    pub success_threshold: u32,
    /// How long to stay `Open` before probing.
    pub open_timeout: Duration,
    /// Quiet period after which the failure counter resets in `Closed`.
    pub failure_reset: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(2 * 60),
            failure_reset: Duration::from_secs(10 * 60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Tight limits for tests.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_millis(50),
            failure_reset: Duration::from_millis(200),
        }
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_failure_reset(mut self, reset: Duration) -> Self {
        self.failure_reset = reset;
        self
    }
}

/// Observable snapshot for diagnostics and operator alerts.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_age: Option<Duration>,
}

impl std::fmt::Display for CircuitBreakerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last_failure = match self.last_failure_age {
            Some(age) => format!("{}s ago", age.as_secs()),
            None => "none".to_string(),
        };
        write!(
            f,
            "state={}, failures={}, successes={}, last_failure={}",
            self.state, self.failure_count, self.success_count, last_failure
        )
    }
}

/// Process-wide circuit breaker. Constructed once at boot and passed
/// into every component that calls the venue.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure: Mutex<Option<Instant>>,
    state_changed: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .field("success_count", &self.success_count())
            .finish()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            state_changed: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn default_config() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn success_count(&self) -> u32 {
        self.success_count.load(Ordering::Acquire)
    }

    /// Gate before a venue call. `Open` fails fast until the open
    /// timeout elapses, at which point the circuit moves to `HalfOpen`
    /// and the call is admitted as a probe.
    ///
    /// # Errors
    /// `EngineError::CircuitOpen` while the circuit is open.
    pub fn acquire(&self, operation: &str) -> Result<()> {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = self.state_changed.lock().map(|t| t.elapsed());
                if elapsed.is_none_or(|e| e >= self.config.open_timeout) {
                    self.transition(CircuitState::HalfOpen);
                    self.success_count.store(0, Ordering::Release);
                    tracing::info!(
                        target: "ironfly::resilience",
                        operation,
                        "circuit breaker transitioning to HALF_OPEN"
                    );
                    Ok(())
                } else {
                    Err(EngineError::CircuitOpen {
                        operation: operation.to_string(),
                    })
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self, operation: &str) {
        match self.state() {
            CircuitState::Closed => {
                // A long quiet stretch forgives earlier failures.
                let quiet = self
                    .last_failure
                    .lock()
                    .map(|t| t.elapsed() >= self.config.failure_reset);
                if quiet == Some(true) {
                    self.failure_count.store(0, Ordering::Release);
                    *self.last_failure.lock() = None;
                    tracing::debug!(
                        target: "ironfly::resilience",
                        "failure count reset after quiet period"
                    );
                }
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::info!(
                    target: "ironfly::resilience",
                    operation,
                    successes,
                    "circuit breaker half-open success"
                );
                if successes >= self.config.success_threshold {
                    self.transition(CircuitState::Closed);
                    self.failure_count.store(0, Ordering::Release);
                    self.success_count.store(0, Ordering::Release);
                    *self.last_failure.lock() = None;
                    tracing::info!(
                        target: "ironfly::resilience",
                        operation,
                        "circuit breaker CLOSED"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self, operation: &str) {
        *self.last_failure.lock() = Some(Instant::now());
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::warn!(
                    target: "ironfly::resilience",
                    operation,
                    failures,
                    "circuit breaker failure"
                );
                if failures >= self.config.failure_threshold {
                    self.transition(CircuitState::Open);
                    self.success_count.store(0, Ordering::Release);
                    tracing::error!(
                        target: "ironfly::resilience",
                        operation,
                        failures,
                        "circuit breaker OPENED"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.transition(CircuitState::Open);
                self.success_count.store(0, Ordering::Release);
                tracing::error!(
                    target: "ironfly::resilience",
                    operation,
                    "circuit breaker re-OPENED from half-open"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Resets to `Closed` with clean counters.
    pub fn reset(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        *self.last_failure.lock() = None;
        *self.state_changed.lock() = Some(Instant::now());
        tracing::info!(target: "ironfly::resilience", "circuit breaker manually reset");
    }

    /// Snapshot for diagnostics; appended to operator alerts.
    #[must_use]
    pub fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            state: self.state(),
            failure_count: self.failure_count(),
            success_count: self.success_count(),
            last_failure_age: self.last_failure.lock().map(|t| t.elapsed()),
        }
    }

    fn transition(&self, to: CircuitState) {
        self.state.store(to as u8, Ordering::Release);
        *self.state_changed.lock() = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig::default())
    }

    // ==================== Threshold Tests ====================

    #[test]
    fn opens_at_failure_threshold_not_before() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure("op");
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 4);

        cb.record_failure("op");
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 5);
    }

    #[test]
    fn open_circuit_fails_fast() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure("opX");
        }
        let err = cb.acquire("opX").unwrap_err();
        assert_eq!(err.error_code(), "CIRCUIT_BREAKER_OPEN");
        assert!(err.to_string().contains("opX"));
    }

    // ==================== Half-Open Tests ====================

    #[test]
    fn open_transitions_to_half_open_after_timeout() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::aggressive());
        for _ in 0..3 {
            cb.record_failure("op");
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.acquire("op").is_err());

        thread::sleep(Duration::from_millis(60));
        assert!(cb.acquire("op").is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::aggressive());
        for _ in 0..3 {
            cb.record_failure("op");
        }
        thread::sleep(Duration::from_millis(60));
        cb.acquire("op").unwrap();

        cb.record_success("op");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success("op");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.success_count(), 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::aggressive());
        for _ in 0..3 {
            cb.record_failure("op");
        }
        thread::sleep(Duration::from_millis(60));
        cb.acquire("op").unwrap();
        cb.record_success("op");
        cb.record_failure("op");
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.acquire("op").is_err());
    }

    // ==================== Reset Tests ====================

    #[test]
    fn reset_then_successes_leave_clean_closed_state() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure("op");
        }
        cb.reset();
        for _ in 0..10 {
            cb.record_success("op");
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn quiet_period_resets_failure_count_in_closed() {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(5)
                .with_failure_reset(Duration::from_millis(30)),
        );
        cb.record_failure("op");
        cb.record_failure("op");
        assert_eq!(cb.failure_count(), 2);

        thread::sleep(Duration::from_millis(40));
        cb.record_success("op");
        assert_eq!(cb.failure_count(), 0);
    }

    // ==================== Status Tests ====================

    #[test]
    fn status_renders_state_and_counters() {
        let cb = breaker();
        cb.record_failure("op");
        let status = cb.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 1);
        let rendered = status.to_string();
        assert!(rendered.contains("state=CLOSED"));
        assert!(rendered.contains("failures=1"));
    }

    #[test]
    fn state_roundtrip_through_u8() {
        assert_eq!(CircuitState::from(CircuitState::Open as u8), CircuitState::Open);
        assert_eq!(CircuitState::from(CircuitState::HalfOpen as u8), CircuitState::HalfOpen);
        assert_eq!(CircuitState::from(7), CircuitState::Closed);
    }
}
