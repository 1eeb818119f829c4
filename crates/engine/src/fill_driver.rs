//! The aggressive-fill order driver.
//!
//! Drives a single limit order from placement toward a complete fill
//! within a per-order deadline, never crossing to a market order.
//! Every poll the driver checks the order status, refreshes the top of
//! book, and walks the limit price across the spread: sells reprice
//! just under the best bid, buys just over the best ask. Rate-limit
//! responses stretch the next sleep; a circuit-breaker-open signal or
//! the shutdown token ends the loop with the current snapshot.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use ironfly_core::error::{EngineError, Result};
use ironfly_core::events::{Event, EventKind, EventSink};
use ironfly_core::models::{OrderModifyRequest, OrderRequest, OrderResponse, OrderSide};
use ironfly_core::venue::OptionsVenue;

use crate::alerts::AlertSink;
use crate::resilience::Resilience;
use crate::ShutdownToken;

/// Price scale used when rounding repriced limits.
const PRICE_DECIMALS: u32 = 8;

/// Cap on the stretched sleep after a rate-limit response.
const RATE_LIMIT_SLEEP_CAP: Duration = Duration::from_secs(30);

/// Cap on the backoff sleep after other transient errors.
const ERROR_SLEEP_CAP: Duration = Duration::from_secs(5);

/// Timing knobs, taken from the trading configuration.
#[derive(Debug, Clone)]
pub struct FillDriverConfig {
    /// Total per-order deadline.
    pub order_timeout: Duration,
    /// Poll cadence while monitoring.
    pub poll_interval: Duration,
}

impl Default for FillDriverConfig {
    fn default() -> Self {
        Self {
            order_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Computes the repriced limit for one side of the book: sells go to
/// `bid × 0.999` rounded down, buys to `ask × 1.001` rounded up. Empty
/// or non-positive book sides yield nothing.
#[must_use]
pub fn aggressive_price(side: OrderSide, best_bid: Option<Decimal>, best_ask: Option<Decimal>) -> Option<Decimal> {
    match side {
        OrderSide::Sell => best_bid
            .filter(|b| *b > Decimal::ZERO)
            .map(|b| (b * dec!(0.999)).round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::ToNegativeInfinity)),
        OrderSide::Buy => best_ask
            .filter(|a| *a > Decimal::ZERO)
            .map(|a| (a * dec!(1.001)).round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::ToPositiveInfinity)),
    }
}

/// Drives one limit order at a time. Cheap to clone via the shared
/// handles; the builder runs four of these concurrently.
pub struct FillDriver {
    venue: Arc<dyn OptionsVenue>,
    resilience: Resilience,
    alerts: Arc<dyn AlertSink>,
    events: Arc<dyn EventSink>,
    config: FillDriverConfig,
    shutdown: ShutdownToken,
}

impl FillDriver {
    #[must_use]
    pub fn new(
        venue: Arc<dyn OptionsVenue>,
        resilience: Resilience,
        alerts: Arc<dyn AlertSink>,
        events: Arc<dyn EventSink>,
        config: FillDriverConfig,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            venue,
            resilience,
            alerts,
            events,
            config,
            shutdown,
        }
    }

    /// Places the order and drives it to fill or deadline. The returned
    /// snapshot is the venue's last reported state; the caller decides
    /// what an unfilled or partial snapshot means.
    ///
    /// # Errors
    /// Only placement failures surface as `Err`; everything after a
    /// successful placement resolves to a snapshot.
    pub async fn drive(&self, request: OrderRequest) -> Result<OrderResponse> {
        let placed = self
            .resilience
            .exec("place_order", || self.venue.place_order(&request))
            .await?;

        self.events.emit(
            Event::new(EventKind::OrderPlaced)
                .with("order_id", &placed.order_id)
                .with("symbol", &request.symbol)
                .with("side", request.side)
                .with("qty", request.quantity)
                .with("price", request.price),
        );

        if placed.is_filled() {
            self.emit_filled(&placed);
            return Ok(placed);
        }
        self.monitor(&request, placed).await
    }

    /// Cancels the residual of a partially filled order, reprices from
    /// the current book and drives a fresh order for the remainder.
    ///
    /// # Errors
    /// Propagates book-fetch and placement failures for the follow-up.
    pub async fn complete_partial(
        &self,
        snapshot: &OrderResponse,
        original: &OrderRequest,
    ) -> Result<OrderResponse> {
        if !snapshot.is_partially_filled() {
            return Ok(snapshot.clone());
        }
        let remaining = original.quantity - snapshot.filled_qty();
        if remaining <= Decimal::ZERO {
            return Ok(snapshot.clone());
        }

        let symbol = original.symbol.clone();
        let order_id = snapshot.order_id.clone();
        if let Err(err) = self
            .resilience
            .exec("cancel_order", || self.venue.cancel_order(&symbol, &order_id))
            .await
        {
            tracing::warn!(
                target: "ironfly::orders",
                order_id = %order_id,
                error = %err,
                "failed to cancel partial order before follow-up"
            );
        }

        let book = self
            .resilience
            .exec("get_order_book", || self.venue.order_book(&symbol, 5))
            .await?;
        let price = aggressive_price(original.side, book.best_bid(), book.best_ask())
            .unwrap_or(original.price);

        tracing::info!(
            target: "ironfly::orders",
            symbol = %symbol,
            remaining = %remaining,
            price = %price,
            "re-driving remaining quantity after partial fill"
        );
        self.drive(OrderRequest {
            symbol,
            side: original.side,
            quantity: remaining,
            price,
        })
        .await
    }

    async fn monitor(&self, request: &OrderRequest, placed: OrderResponse) -> Result<OrderResponse> {
        let deadline = Instant::now() + self.config.order_timeout;
        let mut last = placed;
        let mut next_sleep = self.config.poll_interval;
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                () = sleep(next_sleep) => {}
                () = shutdown.cancelled() => {
                    tracing::info!(
                        target: "ironfly::orders",
                        order_id = %last.order_id,
                        "shutdown requested, abandoning fill loop"
                    );
                    return Ok(last);
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            next_sleep = self.config.poll_interval;

            match self.poll_once(request, &mut last, deadline).await {
                Ok(true) => return Ok(last),
                Ok(false) => {}
                Err(err) => {
                    if matches!(err, EngineError::CircuitOpen { .. }) {
                        tracing::error!(
                            target: "ironfly::orders",
                            order_id = %last.order_id,
                            "circuit breaker open, abandoning fill loop"
                        );
                        return Ok(last);
                    }
                    if err.is_rate_limit() {
                        next_sleep = (self.config.poll_interval * 5).min(RATE_LIMIT_SLEEP_CAP);
                        tracing::warn!(
                            target: "ironfly::orders",
                            order_id = %last.order_id,
                            wait_ms = next_sleep.as_millis() as u64,
                            "rate limited, stretching next poll"
                        );
                    } else {
                        next_sleep = (self.config.poll_interval * 2).min(ERROR_SLEEP_CAP);
                        tracing::warn!(
                            target: "ironfly::orders",
                            order_id = %last.order_id,
                            error = %err,
                            "transient error in fill loop"
                        );
                    }
                }
            }
        }
        Ok(self.finish_timed_out(request, last).await)
    }

    /// One monitoring pass. Returns true when the order completed.
    async fn poll_once(
        &self,
        request: &OrderRequest,
        last: &mut OrderResponse,
        deadline: Instant,
    ) -> Result<bool> {
        let order_id = last.order_id.clone();
        let symbol = request.symbol.clone();

        let status = self
            .resilience
            .exec("get_order_status", || self.venue.order_status(&symbol, &order_id))
            .await?;
        if status.is_filled() {
            *last = status;
            self.emit_filled(last);
            return Ok(true);
        }
        if status.is_partially_filled() {
            tracing::info!(
                target: "ironfly::orders",
                order_id = %order_id,
                filled = %status.filled_qty(),
                total = %request.quantity,
                "partial fill"
            );
        }
        *last = status;

        let book = self
            .resilience
            .exec("get_order_book", || self.venue.order_book(&symbol, 10))
            .await?;
        let Some(new_price) = aggressive_price(request.side, book.best_bid(), book.best_ask()) else {
            return Ok(false);
        };
        if last.price == Some(new_price) {
            return Ok(false);
        }
        // A slow poll can cross the deadline; never reprice past it.
        if Instant::now() >= deadline {
            return Ok(false);
        }

        self.events.emit(
            Event::new(EventKind::OrderModified)
                .with("order_id", &order_id)
                .with("symbol", &symbol)
                .with("old_price", last.price.unwrap_or(Decimal::ZERO))
                .with("new_price", new_price),
        );
        let modify = OrderModifyRequest {
            order_id: order_id.clone(),
            symbol: symbol.clone(),
            quantity: request.quantity,
            price: new_price,
        };
        let modified = self
            .resilience
            .exec("modify_order", || self.venue.modify_order(&modify))
            .await?;
        let done = modified.is_filled();
        *last = modified;
        if done {
            self.emit_filled(last);
        }
        Ok(done)
    }

    async fn finish_timed_out(&self, request: &OrderRequest, last: OrderResponse) -> OrderResponse {
        let order_id = last.order_id.clone();
        let symbol = request.symbol.clone();

        // Final snapshot only; no further repricing past the deadline.
        let final_status = self
            .resilience
            .exec("get_order_status", || self.venue.order_status(&symbol, &order_id))
            .await
            .unwrap_or(last);

        let timeout_secs = self.config.order_timeout.as_secs();
        self.events.emit(
            Event::new(EventKind::OrderTimeout)
                .with("order_id", &order_id)
                .with("symbol", &symbol)
                .with("timeout_secs", timeout_secs)
                .with("status", final_status.status),
        );
        self.alerts.alert(&format!(
            "ORDER ⚠️ not filled within {timeout_secs}s\n\
             Order ID: {order_id}\n\
             Symbol: {symbol}\n\
             Side: {}\n\
             Quantity: {}\n\
             Last price: {}\n\
             Status: {}\n\
             Filled: {}/{}\n\
             Circuit breaker: {}",
            request.side,
            request.quantity,
            final_status.price.unwrap_or(Decimal::ZERO),
            final_status.status,
            final_status.filled_qty(),
            final_status.original_quantity.unwrap_or(request.quantity),
            self.resilience.breaker().status(),
        ));
        final_status
    }

    fn emit_filled(&self, response: &OrderResponse) {
        self.events.emit(
            Event::new(EventKind::OrderFilled)
                .with("order_id", &response.order_id)
                .with("symbol", &response.symbol)
                .with("filled_qty", response.filled_qty())
                .with("avg_price", response.avg_price.unwrap_or(Decimal::ZERO)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::resilience::retry::RetryPolicy;
    use crate::shutdown_channel;
    use crate::testing::{FillMode, MockVenue, RecordingAlerter, RecordingEvents};
    use ironfly_core::models::OrderStatus;

    const SYMBOL: &str = "BTC-250801-60000-C";

    struct Harness {
        venue: Arc<MockVenue>,
        alerts: Arc<RecordingAlerter>,
        events: Arc<RecordingEvents>,
        driver: FillDriver,
        shutdown: crate::ShutdownHandle,
    }

    fn harness(mode: FillMode) -> Harness {
        harness_with(mode, CircuitBreakerConfig::default())
    }

    fn harness_with(mode: FillMode, breaker: CircuitBreakerConfig) -> Harness {
        let venue = Arc::new(MockVenue::with_fill_mode(mode));
        let alerts = Arc::new(RecordingAlerter::new());
        let events = Arc::new(RecordingEvents::new());
        let resilience = Resilience::new(
            Arc::new(CircuitBreaker::new(breaker)),
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        let (handle, token) = shutdown_channel();
        let driver = FillDriver::new(
            venue.clone(),
            resilience,
            alerts.clone(),
            events.clone(),
            FillDriverConfig::default(),
            token,
        );
        Harness {
            venue,
            alerts,
            events,
            driver,
            shutdown: handle,
        }
    }

    fn sell_request(price: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: SYMBOL.to_string(),
            side: OrderSide::Sell,
            quantity: dec!(0.01),
            price,
        }
    }

    // ==================== Pricing Tests ====================

    #[test]
    fn sell_reprices_under_the_bid_rounding_down() {
        let price = aggressive_price(OrderSide::Sell, Some(dec!(1.00000001)), None).unwrap();
        assert_eq!(price, dec!(0.99900000));
    }

    #[test]
    fn buy_reprices_over_the_ask_rounding_up() {
        let price = aggressive_price(OrderSide::Buy, None, Some(dec!(1.00000001))).unwrap();
        assert_eq!(price, dec!(1.00100002));
    }

    #[test]
    fn empty_or_zero_book_side_yields_no_price() {
        assert!(aggressive_price(OrderSide::Sell, None, Some(dec!(1))).is_none());
        assert!(aggressive_price(OrderSide::Sell, Some(Decimal::ZERO), None).is_none());
        assert!(aggressive_price(OrderSide::Buy, Some(dec!(1)), None).is_none());
    }

    // ==================== Fill Path Tests ====================

    #[tokio::test(start_paused = true)]
    async fn immediate_fill_skips_monitoring() {
        let h = harness(FillMode::Immediate);
        let outcome = h.driver.drive(sell_request(dec!(500))).await.unwrap();

        assert!(outcome.is_filled());
        assert_eq!(outcome.avg_price, Some(dec!(500)));
        assert_eq!(h.venue.status_calls(), 0);
        assert_eq!(h.venue.modify_calls(), 0);
        assert_eq!(h.events.count_of(EventKind::OrderPlaced), 1);
        assert_eq!(h.events.count_of(EventKind::OrderFilled), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reprices_toward_the_bid_and_fills_on_modify() {
        let h = harness(FillMode::OnModify);
        h.venue.set_book(SYMBOL, dec!(500), dec!(520));

        // Placed above the book, so the first poll walks the price down.
        let outcome = h.driver.drive(sell_request(dec!(510))).await.unwrap();

        assert!(outcome.is_filled());
        assert_eq!(h.venue.modify_calls(), 1);
        assert_eq!(outcome.avg_price, Some(dec!(499.5))); // 500 × 0.999
        assert_eq!(h.events.count_of(EventKind::OrderModified), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fills_after_a_few_polls_without_repricing() {
        let h = harness(FillMode::AfterPolls(3));
        h.venue.set_book(SYMBOL, dec!(500), dec!(520));

        // Placed exactly at the aggressive price, so no modifications.
        let outcome = h.driver.drive(sell_request(dec!(499.5))).await.unwrap();

        assert!(outcome.is_filled());
        assert_eq!(h.venue.modify_calls(), 0);
        assert_eq!(h.venue.status_calls(), 3);
    }

    // ==================== Timeout Tests ====================

    #[tokio::test(start_paused = true)]
    async fn unfilled_order_times_out_with_one_alert() {
        let h = harness(FillMode::Never);
        h.venue.set_book(SYMBOL, dec!(500), dec!(520));

        let started = Instant::now();
        let outcome = h.driver.drive(sell_request(dec!(499.5))).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(outcome.status, OrderStatus::New);
        assert_eq!(outcome.filled_qty(), Decimal::ZERO);
        // Stable bid and an already-aggressive price: never modified.
        assert_eq!(h.venue.modify_calls(), 0);
        assert_eq!(h.events.count_of(EventKind::OrderTimeout), 1);
        assert_eq!(h.alerts.alerts_containing("not filled within 60s"), 1);
        assert_eq!(h.alerts.alerts_containing(SYMBOL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_order_calls_after_deadline() {
        let h = harness(FillMode::Never);
        h.venue.set_book(SYMBOL, dec!(500), dec!(520));

        h.driver.drive(sell_request(dec!(499.5))).await.unwrap();
        let orders_after_return = h.venue.order_calls();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.venue.order_calls(), orders_after_return);
    }

    // ==================== Cancellation Tests ====================

    #[tokio::test(start_paused = true)]
    async fn shutdown_breaks_the_loop_without_further_venue_calls() {
        let h = harness(FillMode::Never);
        h.venue.set_book(SYMBOL, dec!(500), dec!(520));
        h.shutdown.trigger();

        let outcome = h.driver.drive(sell_request(dec!(499.5))).await.unwrap();
        assert_eq!(outcome.status, OrderStatus::New);
        // Only the placement reached the venue.
        assert_eq!(h.venue.total_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_open_aborts_early_with_snapshot() {
        // Threshold 1: the first failing status poll opens the circuit;
        // the next poll hits CIRCUIT_BREAKER_OPEN and the loop exits
        // with the placement snapshot, well before the 60 s deadline.
        let h = harness_with(
            FillMode::Never,
            CircuitBreakerConfig::default().with_failure_threshold(1),
        );
        h.venue.set_book(SYMBOL, dec!(500), dec!(520));
        h.venue.fail_status_with(EngineError::api(500, "venue down"));

        let started = Instant::now();
        let outcome = h.driver.drive(sell_request(dec!(499.5))).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(outcome.status, OrderStatus::New);
        assert_eq!(outcome.filled_qty(), Decimal::ZERO);
        assert_eq!(h.venue.status_calls(), 1);
        assert_eq!(h.venue.modify_calls(), 0);
    }

    // ==================== Partial Fill Follow-up ====================

    #[tokio::test(start_paused = true)]
    async fn complete_partial_cancels_and_redrives_remainder() {
        let h = harness(FillMode::Immediate);
        h.venue.set_book(SYMBOL, dec!(500), dec!(520));

        let snapshot = OrderResponse {
            order_id: "mock-partial".to_string(),
            symbol: SYMBOL.to_string(),
            status: OrderStatus::PartiallyFilled,
            side: Some(OrderSide::Sell),
            filled_quantity: Some(dec!(0.004)),
            avg_price: Some(dec!(499.5)),
            original_quantity: Some(dec!(0.01)),
            price: Some(dec!(499.5)),
        };
        let original = sell_request(dec!(499.5));
        let outcome = h.driver.complete_partial(&snapshot, &original).await.unwrap();

        assert!(outcome.is_filled());
        let placed = h.venue.placed_requests();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].quantity, dec!(0.006));
        assert_eq!(placed[0].price, dec!(499.5));
    }

    #[tokio::test(start_paused = true)]
    async fn complete_partial_is_a_no_op_for_full_fills() {
        let h = harness(FillMode::Immediate);
        let snapshot = OrderResponse {
            order_id: "mock-full".to_string(),
            symbol: SYMBOL.to_string(),
            status: OrderStatus::Filled,
            side: Some(OrderSide::Sell),
            filled_quantity: Some(dec!(0.01)),
            avg_price: Some(dec!(499.5)),
            original_quantity: Some(dec!(0.01)),
            price: Some(dec!(499.5)),
        };
        let outcome = h
            .driver
            .complete_partial(&snapshot, &sell_request(dec!(499.5)))
            .await
            .unwrap();
        assert_eq!(outcome.order_id, "mock-full");
        assert_eq!(h.venue.total_calls(), 0);
    }
}
