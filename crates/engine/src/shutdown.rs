//! Single-fire shutdown coordination.
//!
//! The first caller performs the teardown sequence; concurrent callers
//! block until it completes and observe the same exit code. Graceful:
//! stop the session (which stops the scheduler through the state
//! channel), flatten every position under a deadline, stop the
//! monitor/risk workers, summarize. Emergency: the same with a short
//! close deadline and exit code 1. The coordinator never exits the
//! process itself — `main` exits with the recorded code.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use ironfly_core::events::{Event, EventKind, EventSink};

use crate::alerts::AlertSink;
use crate::closer::Closer;
use crate::monitor::PositionBook;
use crate::session::SessionHandle;
use crate::ShutdownHandle;

/// Deadline for flattening positions during a graceful shutdown.
const GRACEFUL_CLOSE_DEADLINE: Duration = Duration::from_secs(15);

/// Deadline for flattening positions during an emergency shutdown.
const EMERGENCY_CLOSE_DEADLINE: Duration = Duration::from_secs(5);

pub struct ShutdownCoordinator {
    session: Arc<SessionHandle>,
    closer: Arc<Closer>,
    book: Arc<PositionBook>,
    engine_stop: ShutdownHandle,
    alerts: Arc<dyn AlertSink>,
    events: Arc<dyn EventSink>,
    in_progress: AtomicBool,
    exit_code: Mutex<Option<i32>>,
    complete: Notify,
    close_deadline: Duration,
    emergency_close_deadline: Duration,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new(
        session: Arc<SessionHandle>,
        closer: Arc<Closer>,
        book: Arc<PositionBook>,
        engine_stop: ShutdownHandle,
        alerts: Arc<dyn AlertSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            session,
            closer,
            book,
            engine_stop,
            alerts,
            events,
            in_progress: AtomicBool::new(false),
            exit_code: Mutex::new(None),
            complete: Notify::new(),
            close_deadline: GRACEFUL_CLOSE_DEADLINE,
            emergency_close_deadline: EMERGENCY_CLOSE_DEADLINE,
        }
    }

    /// Overrides the close deadlines. Test hook.
    #[must_use]
    pub fn with_close_deadlines(mut self, graceful: Duration, emergency: Duration) -> Self {
        self.close_deadline = graceful;
        self.emergency_close_deadline = emergency;
        self
    }

    #[must_use]
    pub fn is_shutdown_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Orderly teardown. Returns the process exit code.
    pub async fn graceful(&self, reason: &str) -> i32 {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return self.wait_complete().await;
        }

        tracing::info!(target: "ironfly::session", reason, "graceful shutdown started");
        self.events
            .emit(Event::new(EventKind::GracefulShutdownStarted).with("reason", reason));

        self.teardown(reason, self.close_deadline).await;

        self.events
            .emit(Event::new(EventKind::GracefulShutdownCompleted).with("reason", reason));
        self.alerts.notify(&format!(
            "SHUTDOWN 🛑 graceful shutdown completed\nReason: {reason}\nOpen positions remaining: {}",
            self.book.open_count(),
        ));
        tracing::info!(target: "ironfly::session", "graceful shutdown completed");
        self.finish(0)
    }

    /// Minimum-viable teardown for fatal faults: short close deadline,
    /// exit code 1.
    pub async fn emergency(&self, reason: &str) -> i32 {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return self.wait_complete().await;
        }

        tracing::error!(target: "ironfly::session", reason, "EMERGENCY SHUTDOWN");
        self.events
            .emit(Event::new(EventKind::EmergencyShutdown).with("reason", reason));
        self.alerts.alert(&format!(
            "SHUTDOWN 🚨 emergency shutdown\nReason: {reason}\nImmediate action may be required",
        ));

        self.teardown(reason, self.emergency_close_deadline).await;

        self.alerts.notify(&format!(
            "SHUTDOWN 🛑 emergency shutdown completed\nReason: {reason}\nOpen positions remaining: {}",
            self.book.open_count(),
        ));
        self.finish(1)
    }

    /// The shared sequence. Every step tolerates failure of the one
    /// before it; sinks are infallible by contract.
    async fn teardown(&self, reason: &str, close_deadline: Duration) {
        // Step 1: no new cycles. The scheduler watches session state.
        self.session.end();

        // Step 2: flatten with a deadline.
        let open = self.book.open_count();
        if open > 0 {
            let flatten = self.closer.close_all(reason);
            match tokio::time::timeout(close_deadline, flatten).await {
                Ok(summary) => {
                    if summary.failed > 0 {
                        tracing::error!(
                            target: "ironfly::session",
                            failed = summary.failed,
                            "some positions failed to close during shutdown"
                        );
                    }
                }
                Err(_) => {
                    tracing::error!(
                        target: "ironfly::session",
                        deadline_secs = close_deadline.as_secs(),
                        "position closing timed out during shutdown"
                    );
                    self.alerts.alert(&format!(
                        "SHUTDOWN ⚠️ position closing timed out after {}s\nPositions may remain open\nManual intervention required",
                        close_deadline.as_secs(),
                    ));
                }
            }
        }

        // Step 3: stop the monitor and risk workers.
        self.engine_stop.trigger();
    }

    async fn wait_complete(&self) -> i32 {
        loop {
            let notified = self.complete.notified();
            if let Some(code) = *self.exit_code.lock() {
                return code;
            }
            notified.await;
        }
    }

    fn finish(&self, code: i32) -> i32 {
        *self.exit_code.lock() = Some(code);
        self.complete.notify_waiters();
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill_driver::{FillDriver, FillDriverConfig};
    use crate::resilience::circuit_breaker::CircuitBreaker;
    use crate::resilience::retry::RetryPolicy;
    use crate::resilience::Resilience;
    use crate::shutdown_channel;
    use crate::testing::{FillMode, MockVenue, RecordingAlerter, RecordingEvents};
    use ironfly_core::models::{ButterflyPosition, Leg, OptionKind, OrderSide};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Harness {
        book: Arc<PositionBook>,
        venue: Arc<MockVenue>,
        alerts: Arc<RecordingAlerter>,
        events: Arc<RecordingEvents>,
        session: Arc<SessionHandle>,
        token: crate::ShutdownToken,
        coordinator: Arc<ShutdownCoordinator>,
    }

    fn harness(mode: FillMode, order_timeout: Duration) -> Harness {
        let book = Arc::new(PositionBook::new());
        let venue = Arc::new(MockVenue::with_fill_mode(mode));
        let alerts = Arc::new(RecordingAlerter::new());
        let events = Arc::new(RecordingEvents::new());
        let resilience = Resilience::new(
            Arc::new(CircuitBreaker::default_config()),
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        let (engine_stop, token) = shutdown_channel();
        let driver = FillDriver::new(
            venue.clone(),
            resilience.clone(),
            alerts.clone(),
            events.clone(),
            FillDriverConfig {
                order_timeout,
                poll_interval: Duration::from_secs(1),
            },
            token.clone(),
        );
        let closer = Arc::new(Closer::new(
            book.clone(),
            venue.clone(),
            resilience,
            driver,
            alerts.clone(),
            events.clone(),
        ));
        let session = Arc::new(SessionHandle::new());
        session.set_active();
        let coordinator = Arc::new(ShutdownCoordinator::new(
            session.clone(),
            closer,
            book.clone(),
            engine_stop,
            alerts.clone(),
            events.clone(),
        ));
        Harness {
            book,
            venue,
            alerts,
            events,
            session,
            token,
            coordinator,
        }
    }

    fn filled_leg(symbol: &str, side: OrderSide, kind: OptionKind, strike: Decimal) -> Leg {
        let mut leg = Leg::new(symbol, kind, strike, dec!(0.1), side);
        assert!(leg.record_fill(dec!(100), "oid"));
        leg
    }

    fn butterfly(tag: &str) -> ButterflyPosition {
        ButterflyPosition::new(
            dec!(60000),
            filled_leg(&format!("SC-{tag}"), OrderSide::Sell, OptionKind::Call, dec!(60000)),
            filled_leg(&format!("SP-{tag}"), OrderSide::Sell, OptionKind::Put, dec!(60000)),
            filled_leg(&format!("BC-{tag}"), OrderSide::Buy, OptionKind::Call, dec!(62000)),
            filled_leg(&format!("BP-{tag}"), OrderSide::Buy, OptionKind::Put, dec!(58000)),
        )
    }

    // ==================== Graceful Path ====================

    #[tokio::test(start_paused = true)]
    async fn graceful_closes_positions_ends_session_and_stops_workers() {
        let h = harness(FillMode::Immediate, Duration::from_secs(60));
        h.book.register(butterfly("a"));

        let code = h.coordinator.graceful("session end reached").await;

        assert_eq!(code, 0);
        assert_eq!(h.book.open_count(), 0);
        assert_eq!(h.session.state(), ironfly_core::models::SessionState::Ended);
        assert!(h.token.is_shutdown());
        assert_eq!(h.events.count_of(EventKind::GracefulShutdownStarted), 1);
        assert_eq!(h.events.count_of(EventKind::GracefulShutdownCompleted), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_venue_orders_after_graceful_returns() {
        let h = harness(FillMode::Immediate, Duration::from_secs(60));
        h.book.register(butterfly("a"));

        h.coordinator.graceful("session end reached").await;
        let orders_at_return = h.venue.order_calls();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.venue.order_calls(), orders_at_return);
    }

    // ==================== Single Fire ====================

    #[tokio::test(start_paused = true)]
    async fn parallel_callers_run_the_sequence_exactly_once() {
        let h = harness(FillMode::Immediate, Duration::from_secs(60));
        h.book.register(butterfly("a"));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = h.coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.graceful("session end reached").await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 0);
        }

        assert_eq!(h.events.count_of(EventKind::GracefulShutdownStarted), 1);
        assert_eq!(h.events.count_of(EventKind::GracefulShutdownCompleted), 1);
        // One close per filled leg, once.
        assert_eq!(h.venue.place_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_after_graceful_observes_the_first_outcome() {
        let h = harness(FillMode::Immediate, Duration::from_secs(60));
        let code = h.coordinator.graceful("done").await;
        assert_eq!(code, 0);
        // A late emergency caller gets the already-recorded code.
        assert_eq!(h.coordinator.emergency("late").await, 0);
        assert_eq!(h.events.count_of(EventKind::EmergencyShutdown), 0);
    }

    // ==================== Slow Venue ====================

    #[tokio::test(start_paused = true)]
    async fn slow_closes_hit_the_deadline_and_still_finish_shutdown() {
        // Never-filling orders make each leg close take the full 20 s
        // order timeout, far beyond the 15 s close deadline.
        let h = harness(FillMode::Never, Duration::from_secs(20));
        for tag in ["a", "b", "c"] {
            h.book.register(butterfly(tag));
        }

        let code = h.coordinator.graceful("session end reached").await;

        assert_eq!(code, 0);
        assert_eq!(h.alerts.alerts_containing("Positions may remain open"), 1);
        // The teardown continued: workers stopped, completion notified.
        assert!(h.token.is_shutdown());
        assert_eq!(h.events.count_of(EventKind::GracefulShutdownCompleted), 1);
    }

    // ==================== Emergency Path ====================

    #[tokio::test(start_paused = true)]
    async fn emergency_exits_nonzero_and_alerts() {
        let h = harness(FillMode::Immediate, Duration::from_secs(60));
        h.book.register(butterfly("a"));

        let code = h.coordinator.emergency("Portfolio stop-loss triggered").await;

        assert_eq!(code, 1);
        assert_eq!(h.book.open_count(), 0);
        assert_eq!(h.events.count_of(EventKind::EmergencyShutdown), 1);
        assert_eq!(h.alerts.alerts_containing("emergency shutdown"), 1);
        assert!(h.token.is_shutdown());
    }
}
