//! The ironfly trading engine.
//!
//! Wires the session-gated lifecycle around a repeating iron-butterfly
//! cycle: the scheduler asks the builder for a new position, the builder
//! drives each leg through the aggressive-fill driver, the monitor marks
//! every open position to market at 1 Hz and streams snapshots to the
//! risk engine, and the closer flattens positions when a threshold
//! fires. Every outbound venue call goes through the resilience wrapper
//! (retry + circuit breaker); the shutdown coordinator guarantees no
//! position is left orphaned on the way out.

pub mod alerts;
pub mod builder;
pub mod closer;
pub mod fill_driver;
pub mod market_data;
pub mod monitor;
pub mod resilience;
pub mod risk;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod testing;

pub use alerts::{AlertSink, AlertThrottle, LogAlerter};
pub use builder::ButterflyBuilder;
pub use closer::Closer;
pub use fill_driver::{FillDriver, FillDriverConfig};
pub use monitor::{PositionBook, PositionMonitor, Quote};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use resilience::retry::RetryPolicy;
pub use resilience::Resilience;
pub use risk::{RiskEngine, RiskEngineConfig};
pub use scheduler::{CycleProgress, CycleScheduler};
pub use session::{SessionController, SessionHandle, SessionWorkers};
pub use shutdown::ShutdownCoordinator;

use tokio::sync::watch;

/// Sender half of the broadcast cancellation signal.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signals every worker holding a token. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    #[must_use]
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver half of the broadcast cancellation signal. Cheap to clone;
/// every worker loop polls one of these.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// True once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when shutdown is requested. Usable inside `select!`.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
        // Sender dropped: treat as cancellation so loops wind down.
    }
}

/// Creates the broadcast shutdown channel.
#[must_use]
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownToken { rx })
}
