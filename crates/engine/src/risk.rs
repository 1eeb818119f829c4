//! Per-position and portfolio-level risk rules.
//!
//! Consumes the monitor's per-tick snapshot batches. Per position the
//! stop-loss and profit-target thresholds are percentages of the net
//! premium received; the portfolio check compares aggregate MTM
//! against a fraction of the aggregate worst-case loss and, once
//! latched, liquidates everything and requests emergency shutdown.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use ironfly_core::events::{Event, EventKind, EventSink};
use ironfly_core::models::{PortfolioRiskMetrics, PositionSnapshot, PositionStatus};

use crate::alerts::AlertSink;
use crate::closer::Closer;
use crate::ShutdownToken;

/// How often the portfolio risk figures go to the log.
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Risk thresholds, percentages as configured.
#[derive(Debug, Clone)]
pub struct RiskEngineConfig {
    pub stop_loss_pct: Decimal,
    pub profit_target_pct: Decimal,
    pub portfolio_risk_pct: Decimal,
}

pub struct RiskEngine {
    config: RiskEngineConfig,
    closer: Arc<Closer>,
    alerts: Arc<dyn AlertSink>,
    events: Arc<dyn EventSink>,
    latch: Arc<AtomicBool>,
    emergency: mpsc::Sender<String>,
    last_metrics_log: Mutex<Option<Instant>>,
}

impl RiskEngine {
    #[must_use]
    pub fn new(
        config: RiskEngineConfig,
        closer: Arc<Closer>,
        alerts: Arc<dyn AlertSink>,
        events: Arc<dyn EventSink>,
        latch: Arc<AtomicBool>,
        emergency: mpsc::Sender<String>,
    ) -> Self {
        Self {
            config,
            closer,
            alerts,
            events,
            latch,
            emergency,
            last_metrics_log: Mutex::new(None),
        }
    }

    /// True once the portfolio stop-loss fired.
    #[must_use]
    pub fn is_latched(&self) -> bool {
        self.latch.load(Ordering::SeqCst)
    }

    /// Consumes snapshot batches until shutdown.
    pub async fn run(self, mut snapshots: mpsc::Receiver<Vec<PositionSnapshot>>, mut shutdown: ShutdownToken) {
        tracing::info!(target: "ironfly::risk", "risk engine started");
        loop {
            tokio::select! {
                batch = snapshots.recv() => match batch {
                    Some(batch) => self.evaluate(&batch).await,
                    None => break,
                },
                () = shutdown.cancelled() => break,
            }
        }
        tracing::info!(target: "ironfly::risk", "risk engine stopped");
    }

    /// One tick's worth of checks against one snapshot batch.
    pub async fn evaluate(&self, snapshots: &[PositionSnapshot]) {
        if self.is_latched() || snapshots.is_empty() {
            return;
        }

        for snapshot in snapshots.iter().filter(|s| s.status == PositionStatus::Open) {
            self.check_position(snapshot).await;
        }

        // The portfolio check reads the same tick's snapshot, including
        // positions the per-position pass just closed.
        let metrics = PortfolioRiskMetrics::from_snapshots(snapshots);
        if self.should_trigger_portfolio_stop(&metrics) {
            self.trigger_portfolio_stop(&metrics).await;
            return;
        }
        self.log_metrics_periodically(&metrics);
    }

    /// Applies SL/TP to one position. Stop-loss wins a tie.
    async fn check_position(&self, snapshot: &PositionSnapshot) -> bool {
        if snapshot.net_premium <= Decimal::ZERO {
            // Without premium received there is no percentage base.
            return false;
        }

        let hundred = Decimal::from(100);
        let stop_loss_at = -(snapshot.net_premium * self.config.stop_loss_pct / hundred);
        let profit_target_at = snapshot.net_premium * self.config.profit_target_pct / hundred;

        if snapshot.pnl <= stop_loss_at {
            tracing::warn!(
                target: "ironfly::risk",
                position_id = %snapshot.id,
                pnl = %snapshot.pnl,
                threshold = %stop_loss_at,
                "position stop-loss triggered"
            );
            self.events.emit(
                Event::new(EventKind::RiskEvent)
                    .with("type", "POSITION_STOP_LOSS")
                    .with("position_id", snapshot.id)
                    .with("pnl", snapshot.pnl)
                    .with("threshold", stop_loss_at),
            );
            let reason = format!("Stop-loss: {:.1}%", self.config.stop_loss_pct);
            if let Err(err) = self.closer.close(snapshot.id, PositionStatus::ClosedLoss, &reason).await {
                tracing::error!(
                    target: "ironfly::risk",
                    position_id = %snapshot.id,
                    error = %err,
                    "stop-loss close reported failures"
                );
            }
            return true;
        }

        if snapshot.pnl >= profit_target_at {
            tracing::info!(
                target: "ironfly::risk",
                position_id = %snapshot.id,
                pnl = %snapshot.pnl,
                threshold = %profit_target_at,
                "position profit target reached"
            );
            let reason = format!("Profit target: {:.1}%", self.config.profit_target_pct);
            if let Err(err) = self.closer.close(snapshot.id, PositionStatus::ClosedProfit, &reason).await {
                tracing::error!(
                    target: "ironfly::risk",
                    position_id = %snapshot.id,
                    error = %err,
                    "profit-target close reported failures"
                );
            }
            return true;
        }
        false
    }

    fn should_trigger_portfolio_stop(&self, metrics: &PortfolioRiskMetrics) -> bool {
        if metrics.total_max_loss <= Decimal::ZERO {
            return false;
        }
        let threshold = metrics.total_max_loss * self.config.portfolio_risk_pct / Decimal::from(100);
        metrics.total_mtm <= -threshold
    }

    async fn trigger_portfolio_stop(&self, metrics: &PortfolioRiskMetrics) {
        if self.latch.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::error!(
            target: "ironfly::risk",
            total_max_loss = %metrics.total_max_loss,
            total_mtm = %metrics.total_mtm,
            threshold_pct = %self.config.portfolio_risk_pct,
            "PORTFOLIO STOP-LOSS TRIGGERED"
        );
        self.events.emit(
            Event::new(EventKind::RiskEvent)
                .with("type", "PORTFOLIO_STOP_LOSS")
                .with("total_max_loss", metrics.total_max_loss)
                .with("total_mtm", metrics.total_mtm)
                .with("threshold_pct", self.config.portfolio_risk_pct),
        );
        self.alerts.alert(&format!(
            "RISK 🚨 PORTFOLIO STOP-LOSS TRIGGERED 🚨\nPositions: {}\nMax theoretical loss: {}\nCurrent MTM: {}\nRisk threshold: {}%\nClosing all positions immediately",
            metrics.total_positions,
            metrics.total_max_loss,
            metrics.total_mtm,
            self.config.portfolio_risk_pct,
        ));

        self.closer.close_all("Portfolio stop-loss triggered").await;

        if self.emergency.try_send("Portfolio stop-loss triggered".to_string()).is_err() {
            tracing::error!(target: "ironfly::risk", "emergency shutdown request channel unavailable");
        }
    }

    fn log_metrics_periodically(&self, metrics: &PortfolioRiskMetrics) {
        let mut last = self.last_metrics_log.lock();
        let due = last.is_none_or(|t| t.elapsed() >= METRICS_LOG_INTERVAL);
        if !due {
            return;
        }
        *last = Some(Instant::now());

        let utilization = if metrics.total_max_loss > Decimal::ZERO {
            (metrics.total_mtm / metrics.total_max_loss * Decimal::from(100)).round_dp(2)
        } else {
            Decimal::ZERO
        };
        tracing::info!(
            target: "ironfly::risk",
            open_positions = metrics.total_positions,
            with_prices = metrics.positions_with_prices,
            total_max_loss = %metrics.total_max_loss,
            total_mtm = %metrics.total_mtm,
            utilization_pct = %utilization,
            risk_limit_pct = %self.config.portfolio_risk_pct,
            "portfolio risk metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill_driver::{FillDriver, FillDriverConfig};
    use crate::monitor::PositionBook;
    use crate::resilience::circuit_breaker::CircuitBreaker;
    use crate::resilience::retry::RetryPolicy;
    use crate::resilience::Resilience;
    use crate::shutdown_channel;
    use crate::testing::{FillMode, MockVenue, RecordingAlerter, RecordingEvents};
    use ironfly_core::models::{ButterflyPosition, Leg, OptionKind, OrderSide};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Harness {
        book: Arc<PositionBook>,
        venue: Arc<MockVenue>,
        alerts: Arc<RecordingAlerter>,
        events: Arc<RecordingEvents>,
        engine: RiskEngine,
        emergency_rx: mpsc::Receiver<String>,
    }

    fn harness(config: RiskEngineConfig) -> Harness {
        let book = Arc::new(PositionBook::new());
        let venue = Arc::new(MockVenue::with_fill_mode(FillMode::Immediate));
        let alerts = Arc::new(RecordingAlerter::new());
        let events = Arc::new(RecordingEvents::new());
        let resilience = Resilience::new(
            Arc::new(CircuitBreaker::default_config()),
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        let (_handle, token) = shutdown_channel();
        let driver = FillDriver::new(
            venue.clone(),
            resilience.clone(),
            alerts.clone(),
            events.clone(),
            FillDriverConfig::default(),
            token,
        );
        let closer = Arc::new(Closer::new(
            book.clone(),
            venue.clone(),
            resilience,
            driver,
            alerts.clone(),
            events.clone(),
        ));
        let (emergency_tx, emergency_rx) = mpsc::channel(1);
        let engine = RiskEngine::new(
            config,
            closer,
            alerts.clone(),
            events.clone(),
            Arc::new(AtomicBool::new(false)),
            emergency_tx,
        );
        Harness {
            book,
            venue,
            alerts,
            events,
            engine,
            emergency_rx,
        }
    }

    fn default_config() -> RiskEngineConfig {
        RiskEngineConfig {
            stop_loss_pct: dec!(30),
            profit_target_pct: dec!(50),
            portfolio_risk_pct: dec!(10),
        }
    }

    fn filled_leg(symbol: &str, side: OrderSide, kind: OptionKind, strike: Decimal, entry: Decimal) -> Leg {
        let mut leg = Leg::new(symbol, kind, strike, dec!(1), side);
        assert!(leg.record_fill(entry, "oid"));
        leg
    }

    /// A butterfly with net premium 10.00 at quantity 1.
    fn premium_ten_butterfly() -> ButterflyPosition {
        ButterflyPosition::new(
            dec!(60000),
            filled_leg("SC", OrderSide::Sell, OptionKind::Call, dec!(60000), dec!(7)),
            filled_leg("SP", OrderSide::Sell, OptionKind::Put, dec!(60000), dec!(6)),
            filled_leg("BC", OrderSide::Buy, OptionKind::Call, dec!(62000), dec!(1.5)),
            filled_leg("BP", OrderSide::Buy, OptionKind::Put, dec!(58000), dec!(1.5)),
        )
    }

    fn snapshot(id: Uuid, pnl: Decimal, net_premium: Decimal, max_loss: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            id,
            status: PositionStatus::Open,
            pnl,
            net_premium,
            max_loss,
        }
    }

    // ==================== Per-Position Tests ====================

    #[tokio::test(start_paused = true)]
    async fn stop_loss_closes_with_loss_status_and_reason() {
        let h = harness(default_config());
        let id = h.book.register(premium_ten_butterfly());

        // NetPrem 10, SL 30% → threshold −3. P&L −3.50 breaches it.
        h.engine.evaluate(&[snapshot(id, dec!(-3.50), dec!(10.00), dec!(100))]).await;

        let position = h.book.get(id).unwrap();
        assert_eq!(position.status(), PositionStatus::ClosedLoss);
        // One closing order per filled leg.
        assert_eq!(h.venue.place_calls(), 4);
        assert!(h
            .alerts
            .notifies()
            .iter()
            .any(|n| n.contains("Stop-loss: 30.0%")));
    }

    #[tokio::test(start_paused = true)]
    async fn profit_target_closes_with_profit_status() {
        let h = harness(default_config());
        let id = h.book.register(premium_ten_butterfly());

        // NetPrem 10, TP 50% → threshold +5.
        h.engine.evaluate(&[snapshot(id, dec!(5.00), dec!(10.00), dec!(100))]).await;

        assert_eq!(h.book.get(id).unwrap().status(), PositionStatus::ClosedProfit);
        assert!(h
            .alerts
            .notifies()
            .iter()
            .any(|n| n.contains("Profit target: 50.0%")));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_loss_wins_when_both_would_fire() {
        // Degenerate thresholds so one P&L value satisfies both rules.
        let h = harness(RiskEngineConfig {
            stop_loss_pct: dec!(0),
            profit_target_pct: dec!(0.0001),
            portfolio_risk_pct: dec!(99),
        });
        let id = h.book.register(premium_ten_butterfly());

        h.engine.evaluate(&[snapshot(id, dec!(0), dec!(10.00), dec!(100))]).await;
        assert_eq!(h.book.get(id).unwrap().status(), PositionStatus::ClosedLoss);
    }

    #[tokio::test(start_paused = true)]
    async fn no_premium_means_no_percentage_checks() {
        let h = harness(default_config());
        let id = h.book.register(premium_ten_butterfly());

        h.engine.evaluate(&[snapshot(id, dec!(-1000), Decimal::ZERO, dec!(100))]).await;
        assert_eq!(h.book.get(id).unwrap().status(), PositionStatus::Open);
        assert_eq!(h.venue.place_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn within_thresholds_nothing_happens() {
        let h = harness(default_config());
        let id = h.book.register(premium_ten_butterfly());

        h.engine.evaluate(&[snapshot(id, dec!(-2.99), dec!(10.00), dec!(100))]).await;
        h.engine.evaluate(&[snapshot(id, dec!(4.99), dec!(10.00), dec!(100))]).await;
        assert_eq!(h.book.get(id).unwrap().status(), PositionStatus::Open);
    }

    // ==================== Portfolio Tests ====================

    #[tokio::test(start_paused = true)]
    async fn portfolio_stop_latches_once_and_requests_emergency() {
        let mut h = harness(default_config());
        let a = h.book.register(premium_ten_butterfly());
        let b = h.book.register(premium_ten_butterfly());

        // MaxLoss 1000 + 500, MTM −160 ≤ −150 (10% of 1500). Zero net
        // premium keeps the per-position rules out of the way so the
        // portfolio rule is what fires.
        let batch = vec![
            snapshot(a, dec!(-100), Decimal::ZERO, dec!(1000)),
            snapshot(b, dec!(-60), Decimal::ZERO, dec!(500)),
        ];
        h.engine.evaluate(&batch).await;
        assert!(h.engine.is_latched());
        assert_eq!(h.alerts.alerts_containing("PORTFOLIO STOP-LOSS TRIGGERED"), 1);
        assert_eq!(h.book.open_count(), 0, "close_all flattened everything");
        assert_eq!(h.emergency_rx.try_recv().unwrap(), "Portfolio stop-loss triggered");

        // Further batches short-circuit: no second alert, no new orders.
        let orders_before = h.venue.place_calls();
        h.engine.evaluate(&batch).await;
        assert_eq!(h.alerts.alerts_containing("PORTFOLIO STOP-LOSS TRIGGERED"), 1);
        assert_eq!(h.venue.place_calls(), orders_before);
    }

    #[tokio::test(start_paused = true)]
    async fn portfolio_with_zero_max_loss_never_triggers() {
        let h = harness(default_config());
        let id = h.book.register(premium_ten_butterfly());

        h.engine.evaluate(&[snapshot(id, dec!(-10000), Decimal::ZERO, Decimal::ZERO)]).await;
        assert!(!h.engine.is_latched());
        assert_eq!(h.book.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn portfolio_just_inside_threshold_does_not_trigger() {
        let h = harness(default_config());
        let id = h.book.register(premium_ten_butterfly());

        // Threshold at −100 for MaxLoss 1000 and 10%.
        h.engine.evaluate(&[snapshot(id, dec!(-99.99), Decimal::ZERO, dec!(1000))]).await;
        assert!(!h.engine.is_latched());

        h.engine.evaluate(&[snapshot(id, dec!(-100), Decimal::ZERO, dec!(1000))]).await;
        assert!(h.engine.is_latched(), "boundary is inclusive");
    }

    #[tokio::test(start_paused = true)]
    async fn risk_events_are_emitted() {
        let h = harness(default_config());
        let id = h.book.register(premium_ten_butterfly());
        h.engine.evaluate(&[snapshot(id, dec!(-3.50), dec!(10.00), dec!(1000))]).await;
        assert!(h.events.count_of(EventKind::RiskEvent) >= 1);
    }
}
