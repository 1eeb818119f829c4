//! Flattens positions: one opposing-side limit order per filled leg,
//! driven through the aggressive-fill driver.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use ironfly_core::error::{EngineError, Result};
use ironfly_core::events::{Event, EventKind, EventSink};
use ironfly_core::models::{Leg, OrderRequest, OrderSide, PositionStatus};
use ironfly_core::venue::OptionsVenue;

use crate::alerts::AlertSink;
use crate::fill_driver::FillDriver;
use crate::monitor::PositionBook;
use crate::resilience::Resilience;

/// Cap on the backoff between whole-position close retries.
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Outcome of a bulk close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseAllSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Closer {
    book: Arc<PositionBook>,
    venue: Arc<dyn OptionsVenue>,
    resilience: Resilience,
    driver: FillDriver,
    alerts: Arc<dyn AlertSink>,
    events: Arc<dyn EventSink>,
}

impl Closer {
    #[must_use]
    pub fn new(
        book: Arc<PositionBook>,
        venue: Arc<dyn OptionsVenue>,
        resilience: Resilience,
        driver: FillDriver,
        alerts: Arc<dyn AlertSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            book,
            venue,
            resilience,
            driver,
            alerts,
            events,
        }
    }

    /// Closes one position: every filled leg gets an opposing limit
    /// order priced from the current book; unfilled legs are skipped.
    /// The status moves to `status` after all legs were attempted.
    ///
    /// # Errors
    /// Returns an error when any leg failed to close. Other legs are
    /// still attempted and the status is still set.
    pub async fn close(&self, id: Uuid, status: PositionStatus, reason: &str) -> Result<()> {
        let Some(position) = self.book.get(id) else {
            return Err(EngineError::internal(format!("unknown position {id}")));
        };
        if !position.is_open() {
            tracing::debug!(
                target: "ironfly::positions",
                position_id = %id,
                "close requested for non-open position"
            );
            return Ok(());
        }

        tracing::info!(
            target: "ironfly::positions",
            position_id = %id,
            reason,
            "closing position"
        );
        let legs: Vec<Leg> = position.legs().filter(|l| l.is_filled()).cloned().collect();
        let failed = self.close_legs(&legs).await;

        self.finalize(id, status, reason);

        if failed.is_empty() {
            Ok(())
        } else {
            let symbols: Vec<String> = failed.iter().map(|l| l.symbol.clone()).collect();
            self.alerts.alert(&format!(
                "POSITION ❌ failed to close {} leg(s) of {id}\nSymbols: {}\nReason: {reason}",
                failed.len(),
                symbols.join(", "),
            ));
            Err(EngineError::order(symbols.join(","), "leg close failed"))
        }
    }

    /// Closes every open position with `CLOSED_RISK`.
    pub async fn close_all(&self, reason: &str) -> CloseAllSummary {
        let open = self.book.open_positions();
        tracing::warn!(
            target: "ironfly::positions",
            count = open.len(),
            reason,
            "closing all open positions"
        );

        let mut summary = CloseAllSummary {
            attempted: open.len(),
            succeeded: 0,
            failed: 0,
        };
        for position in open {
            match self.close(position.id, PositionStatus::ClosedRisk, reason).await {
                Ok(()) => summary.succeeded += 1,
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(
                        target: "ironfly::positions",
                        position_id = %position.id,
                        error = %err,
                        "failed to close position during bulk closure"
                    );
                }
            }
        }

        tracing::info!(
            target: "ironfly::positions",
            succeeded = summary.succeeded,
            failed = summary.failed,
            "bulk position closure finished"
        );
        if summary.failed > 0 {
            self.alerts.alert(&format!(
                "POSITION ⚠️ bulk closure issues\nReason: {reason}\nTotal: {}\nClosed: {}\nFailed: {}\nManual intervention may be required",
                summary.attempted, summary.succeeded, summary.failed,
            ));
        }
        summary
    }

    /// Whole-position close with exponential backoff between attempts.
    /// Later attempts only re-drive the legs that failed; the terminal
    /// status is published after the first pass.
    ///
    /// # Errors
    /// Returns the last error after `max_attempts` exhausted; a
    /// "manual intervention" alert has been raised by then.
    pub async fn close_with_retry(
        &self,
        id: Uuid,
        status: PositionStatus,
        reason: &str,
        max_attempts: u32,
    ) -> Result<()> {
        let Some(position) = self.book.get(id) else {
            return Err(EngineError::internal(format!("unknown position {id}")));
        };
        if !position.is_open() {
            return Ok(());
        }

        let mut remaining: Vec<Leg> = position.legs().filter(|l| l.is_filled()).cloned().collect();
        for attempt in 1..=max_attempts.max(1) {
            let failed = self.close_legs(&remaining).await;
            if attempt == 1 {
                self.finalize(id, status, reason);
            }
            if failed.is_empty() {
                if attempt > 1 {
                    tracing::info!(
                        target: "ironfly::positions",
                        position_id = %id,
                        attempt,
                        "position fully closed after retry"
                    );
                }
                return Ok(());
            }
            tracing::warn!(
                target: "ironfly::positions",
                position_id = %id,
                attempt,
                max_attempts,
                remaining = failed.len(),
                "position close attempt left unclosed legs"
            );
            remaining = failed;
            if attempt < max_attempts {
                let backoff = Duration::from_secs(2u64.pow(attempt.min(10))).min(RETRY_BACKOFF_CAP);
                tokio::time::sleep(backoff).await;
            }
        }

        self.alerts.alert(&format!(
            "POSITION ❌ CRITICAL: failed to close position\nPosition: {id}\nReason: {reason}\nAttempts: {max_attempts}\nMANUAL INTERVENTION REQUIRED",
        ));
        Err(EngineError::order(
            remaining.iter().map(|l| l.symbol.clone()).collect::<Vec<_>>().join(","),
            "position close retries exhausted",
        ))
    }

    async fn close_legs(&self, legs: &[Leg]) -> Vec<Leg> {
        let mut failed = Vec::new();
        for leg in legs {
            if let Err(err) = self.close_leg(leg).await {
                tracing::error!(
                    target: "ironfly::positions",
                    symbol = %leg.symbol,
                    error = %err,
                    "failed to close leg"
                );
                failed.push(leg.clone());
            }
        }
        failed
    }

    async fn close_leg(&self, leg: &Leg) -> Result<()> {
        let closing_side = leg.side.opposite();

        let book = self
            .resilience
            .exec("get_order_book", || self.venue.order_book(&leg.symbol, 5))
            .await
            .ok();
        let book_price = book
            .as_ref()
            .and_then(|b| match closing_side {
                OrderSide::Sell => b.best_bid(),
                OrderSide::Buy => b.best_ask(),
            })
            .filter(|p| *p > Decimal::ZERO);
        let price = book_price
            .or(leg.current_price)
            .or(leg.entry_price())
            .ok_or_else(|| EngineError::order(leg.symbol.clone(), "no closing price available"))?;

        tracing::info!(
            target: "ironfly::positions",
            symbol = %leg.symbol,
            side = %closing_side,
            qty = %leg.quantity,
            price = %price,
            "closing leg"
        );
        let outcome = self
            .driver
            .drive(OrderRequest {
                symbol: leg.symbol.clone(),
                side: closing_side,
                quantity: leg.quantity,
                price,
            })
            .await?;

        if outcome.is_filled() {
            Ok(())
        } else if outcome.is_partially_filled() {
            tracing::warn!(
                target: "ironfly::positions",
                symbol = %leg.symbol,
                filled = %outcome.filled_qty(),
                total = %leg.quantity,
                "leg closure only partially filled"
            );
            Ok(())
        } else {
            Err(EngineError::order(
                leg.symbol.clone(),
                format!("closing order ended {}", outcome.status),
            ))
        }
    }

    /// Publishes the terminal status and the close event/notification.
    fn finalize(&self, id: Uuid, status: PositionStatus, reason: &str) {
        self.book.set_status(id, status);
        let final_pnl = self.book.get(id).map(|p| p.pnl()).unwrap_or_default();
        self.events.emit(
            Event::new(EventKind::PositionClosed)
                .with("position_id", id)
                .with("reason", reason)
                .with("final_pnl", final_pnl)
                .with("status", status),
        );
        self.alerts.notify(&format!(
            "POSITION 🔒 position closed\nPosition: {id}\nReason: {reason}\nFinal P&L: {final_pnl}\nStatus: {status}",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill_driver::FillDriverConfig;
    use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::resilience::retry::RetryPolicy;
    use crate::shutdown_channel;
    use crate::testing::{FillMode, MockVenue, RecordingAlerter, RecordingEvents};
    use ironfly_core::models::{ButterflyPosition, OptionKind};
    use rust_decimal_macros::dec;

    struct Harness {
        book: Arc<PositionBook>,
        venue: Arc<MockVenue>,
        alerts: Arc<RecordingAlerter>,
        events: Arc<RecordingEvents>,
        closer: Closer,
    }

    fn harness(mode: FillMode) -> Harness {
        let book = Arc::new(PositionBook::new());
        let venue = Arc::new(MockVenue::with_fill_mode(mode));
        let alerts = Arc::new(RecordingAlerter::new());
        let events = Arc::new(RecordingEvents::new());
        let resilience = Resilience::new(
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(1000))),
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        let (_handle, token) = shutdown_channel();
        let driver = FillDriver::new(
            venue.clone(),
            resilience.clone(),
            alerts.clone(),
            events.clone(),
            FillDriverConfig {
                order_timeout: Duration::from_secs(2),
                poll_interval: Duration::from_millis(100),
            },
            token,
        );
        let closer = Closer::new(
            book.clone(),
            venue.clone(),
            resilience,
            driver,
            alerts.clone(),
            events.clone(),
        );
        Harness {
            book,
            venue,
            alerts,
            events,
            closer,
        }
    }

    fn filled_leg(symbol: &str, side: OrderSide, kind: OptionKind, strike: Decimal, entry: Decimal) -> Leg {
        let mut leg = Leg::new(symbol, kind, strike, dec!(0.1), side);
        assert!(leg.record_fill(entry, "oid"));
        leg
    }

    fn butterfly_with_unfilled_wing() -> ButterflyPosition {
        ButterflyPosition::new(
            dec!(60000),
            filled_leg("SC", OrderSide::Sell, OptionKind::Call, dec!(60000), dec!(500)),
            filled_leg("SP", OrderSide::Sell, OptionKind::Put, dec!(60000), dec!(480)),
            filled_leg("BC", OrderSide::Buy, OptionKind::Call, dec!(62000), dec!(120)),
            Leg::new("BP", OptionKind::Put, dec!(58000), dec!(0.1), OrderSide::Buy),
        )
    }

    // ==================== Close Tests ====================

    #[tokio::test(start_paused = true)]
    async fn closes_filled_legs_on_the_opposite_side_and_skips_unfilled() {
        let h = harness(FillMode::Immediate);
        let id = h.book.register(butterfly_with_unfilled_wing());
        h.venue.set_book("SC", dec!(450), dec!(470));
        h.venue.set_book("SP", dec!(400), dec!(420));
        h.venue.set_book("BC", dec!(130), dec!(140));

        h.closer.close(id, PositionStatus::ClosedProfit, "Profit target: 50.0%").await.unwrap();

        let placed = h.venue.placed_requests();
        assert_eq!(placed.len(), 3, "unfilled BP leg must be skipped");
        // Sold legs buy back at the ask, bought legs sell at the bid.
        let sc = placed.iter().find(|r| r.symbol == "SC").unwrap();
        assert_eq!(sc.side, OrderSide::Buy);
        assert_eq!(sc.price, dec!(470));
        let bc = placed.iter().find(|r| r.symbol == "BC").unwrap();
        assert_eq!(bc.side, OrderSide::Sell);
        assert_eq!(bc.price, dec!(130));

        assert_eq!(h.book.get(id).unwrap().status(), PositionStatus::ClosedProfit);
        assert_eq!(h.events.count_of(EventKind::PositionClosed), 1);
        assert!(h.alerts.notifies().iter().any(|n| n.contains("position closed")));
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_last_seen_price_when_book_is_empty() {
        let h = harness(FillMode::Immediate);
        let mut position = butterfly_with_unfilled_wing();
        position.sell_put.current_price = Some(dec!(430));
        let id = h.book.register(position);
        // No books at all: SC and BC fall back to entry, SP to current.

        h.closer.close(id, PositionStatus::ClosedLoss, "Stop-loss: 30.0%").await.unwrap();

        let placed = h.venue.placed_requests();
        let sp = placed.iter().find(|r| r.symbol == "SP").unwrap();
        assert_eq!(sp.price, dec!(430));
        let sc = placed.iter().find(|r| r.symbol == "SC").unwrap();
        assert_eq!(sc.price, dec!(500));
    }

    #[tokio::test(start_paused = true)]
    async fn close_of_unknown_position_is_an_error() {
        let h = harness(FillMode::Immediate);
        assert!(h.closer.close(Uuid::new_v4(), PositionStatus::ClosedRisk, "x").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn close_of_closed_position_is_a_no_op() {
        let h = harness(FillMode::Immediate);
        let id = h.book.register(butterfly_with_unfilled_wing());
        h.book.set_status(id, PositionStatus::ClosedProfit);

        h.closer.close(id, PositionStatus::ClosedRisk, "x").await.unwrap();
        assert_eq!(h.venue.total_calls(), 0);
        assert_eq!(h.book.get(id).unwrap().status(), PositionStatus::ClosedProfit);
    }

    #[tokio::test(start_paused = true)]
    async fn leg_failures_alert_but_status_is_still_set() {
        let h = harness(FillMode::Immediate);
        let id = h.book.register(butterfly_with_unfilled_wing());
        h.venue.fail_orders_with(EngineError::order("SC", "rejected"));

        let result = h.closer.close(id, PositionStatus::ClosedRisk, "risk").await;
        assert!(result.is_err());
        assert_eq!(h.book.get(id).unwrap().status(), PositionStatus::ClosedRisk);
        assert_eq!(h.alerts.alerts_containing("failed to close"), 1);
    }

    // ==================== Close-All Tests ====================

    #[tokio::test(start_paused = true)]
    async fn close_all_flattens_every_open_position_as_risk() {
        let h = harness(FillMode::Immediate);
        let a = h.book.register(butterfly_with_unfilled_wing());
        let b = h.book.register(butterfly_with_unfilled_wing());

        let summary = h.closer.close_all("Portfolio stop-loss triggered").await;
        assert_eq!(summary, CloseAllSummary { attempted: 2, succeeded: 2, failed: 0 });
        assert_eq!(h.book.get(a).unwrap().status(), PositionStatus::ClosedRisk);
        assert_eq!(h.book.get(b).unwrap().status(), PositionStatus::ClosedRisk);
        assert_eq!(h.book.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_reports_failures_and_asks_for_manual_intervention() {
        let h = harness(FillMode::Immediate);
        h.book.register(butterfly_with_unfilled_wing());
        h.venue.fail_orders_with(EngineError::order("SC", "rejected"));

        let summary = h.closer.close_all("session end reached").await;
        assert_eq!(summary.failed, 1);
        assert_eq!(h.alerts.alerts_containing("Manual intervention may be required"), 1);
    }

    // ==================== Retry Tests ====================

    #[tokio::test(start_paused = true)]
    async fn close_with_retry_recovers_after_transient_failure() {
        let h = harness(FillMode::Immediate);
        let id = h.book.register(butterfly_with_unfilled_wing());
        h.venue.fail_orders_with(EngineError::order("SC", "glitch"));

        let closer = &h.closer;
        let venue = h.venue.clone();
        // Heal the venue while the retry backoff sleeps.
        let healer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            venue.clear_order_error();
        });
        closer
            .close_with_retry(id, PositionStatus::ClosedRisk, "risk", 3)
            .await
            .unwrap();
        healer.await.unwrap();

        assert_eq!(h.book.get(id).unwrap().status(), PositionStatus::ClosedRisk);
    }

    #[tokio::test(start_paused = true)]
    async fn close_with_retry_escalates_after_exhaustion() {
        let h = harness(FillMode::Immediate);
        let id = h.book.register(butterfly_with_unfilled_wing());
        h.venue.fail_orders_with(EngineError::order("SC", "rejected"));

        let result = h.closer.close_with_retry(id, PositionStatus::ClosedRisk, "risk", 2).await;
        assert!(result.is_err());
        assert_eq!(h.alerts.alerts_containing("MANUAL INTERVENTION REQUIRED"), 1);
    }
}
