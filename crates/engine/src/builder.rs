//! Builds one iron butterfly per cycle: discover strikes from live
//! market data, issue the four leg orders concurrently through the
//! fill driver, and register the resulting position with the book.

use chrono::Local;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use ironfly_core::error::{EngineError, Result};
use ironfly_core::events::{Event, EventKind, EventSink};
use ironfly_core::models::{
    ButterflyPosition, Leg, OptionContract, OrderBook, OrderRequest, OrderResponse, OrderSide,
};
use ironfly_core::venue::OptionsVenue;

use crate::alerts::AlertSink;
use crate::fill_driver::FillDriver;
use crate::market_data::{self, StrikeSelection, StrikeSelectionError};
use crate::monitor::PositionBook;
use crate::resilience::Resilience;

pub struct ButterflyBuilder {
    venue: Arc<dyn OptionsVenue>,
    resilience: Resilience,
    driver: Arc<FillDriver>,
    book: Arc<PositionBook>,
    alerts: Arc<dyn AlertSink>,
    events: Arc<dyn EventSink>,
    quantity: Decimal,
    strike_distance: u32,
}

impl ButterflyBuilder {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        venue: Arc<dyn OptionsVenue>,
        resilience: Resilience,
        driver: Arc<FillDriver>,
        book: Arc<PositionBook>,
        alerts: Arc<dyn AlertSink>,
        events: Arc<dyn EventSink>,
        quantity: Decimal,
        strike_distance: u32,
    ) -> Self {
        Self {
            venue,
            resilience,
            driver,
            book,
            alerts,
            events,
            quantity,
            strike_distance,
        }
    }

    /// Builds one butterfly. Market-data or strike-selection failures
    /// fail the whole cycle; per-leg order failures leave that leg
    /// unfilled and the position is registered anyway.
    ///
    /// # Errors
    /// Any failure before order submission.
    pub async fn build_one(&self) -> Result<Uuid> {
        let reference = self
            .resilience
            .exec("reference_price", || self.venue.reference_price())
            .await?;

        let expiries = self
            .resilience
            .exec("available_expiries", || self.venue.available_expiries())
            .await?;
        let today = Local::now().date_naive();
        let expiry = market_data::pick_expiry(&expiries, today)
            .map_err(|e| EngineError::internal(e.to_string()))?;

        let selection = self.select_with_one_retry(expiry, reference).await?;
        tracing::info!(
            target: "ironfly::trading",
            reference = %reference,
            atm_strike = %selection.atm_strike,
            otm_call = %selection.otm_call.strike,
            otm_put = %selection.otm_put.strike,
            grid_step = %selection.grid_step,
            "butterfly legs identified"
        );

        let orders = self.leg_orders(&selection).await?;
        let position = self.execute_legs(&selection, orders).await;
        let id = position.id;
        let filled = position.filled_legs();
        let net_premium = position.net_premium();
        let max_loss = position.max_theoretical_loss();
        let atm_strike = position.atm_strike;

        self.events.emit(
            Event::new(EventKind::PositionCreated)
                .with("position_id", id)
                .with("atm_strike", atm_strike)
                .with("filled_legs", filled)
                .with("net_premium", net_premium)
                .with("max_loss", max_loss),
        );
        self.book.register(position);

        if filled < 4 {
            self.alerts.alert(&format!(
                "POSITION ⚠️ incomplete iron butterfly\nPosition: {id}\nLegs filled: {filled}/4\nATM strike: {atm_strike}\nNet premium: {net_premium}",
            ));
        } else {
            self.alerts.notify(&format!(
                "POSITION ✅ iron butterfly executed\nPosition: {id}\nATM strike: {atm_strike}\nNet premium: {net_premium}\nMax loss: {max_loss}",
            ));
        }
        Ok(id)
    }

    /// Strike selection, refetching the chain once when the ATM call
    /// and put strikes disagree.
    async fn select_with_one_retry(
        &self,
        expiry: chrono::NaiveDate,
        reference: Decimal,
    ) -> Result<StrikeSelection> {
        let chain = self.fetch_chain(expiry).await?;
        match market_data::select_strikes(&chain, reference, self.strike_distance) {
            Ok(selection) => Ok(selection),
            Err(StrikeSelectionError::AtmMismatch { .. }) => {
                tracing::warn!(
                    target: "ironfly::trading",
                    "ATM strikes diverged, refetching chain once"
                );
                let chain = self.fetch_chain(expiry).await?;
                market_data::select_strikes(&chain, reference, self.strike_distance)
                    .map_err(|e| EngineError::internal(e.to_string()))
            }
            Err(other) => Err(EngineError::internal(other.to_string())),
        }
    }

    async fn fetch_chain(&self, expiry: chrono::NaiveDate) -> Result<Vec<OptionContract>> {
        let chain = self
            .resilience
            .exec("options_chain", || self.venue.options_chain(expiry))
            .await?;
        if chain.is_empty() {
            return Err(EngineError::internal(format!(
                "no option contracts available for expiry {expiry}"
            )));
        }
        Ok(chain)
    }

    /// Prices the four legs from fresh books: short legs sell at the
    /// bid, long legs buy at the ask, each falling back to the other
    /// side and then to the chain's embedded quote.
    async fn leg_orders(&self, selection: &StrikeSelection) -> Result<[OrderRequest; 4]> {
        let sell_call = self
            .price_leg(&selection.atm_call, OrderSide::Sell)
            .await?;
        let sell_put = self.price_leg(&selection.atm_put, OrderSide::Sell).await?;
        let buy_call = self.price_leg(&selection.otm_call, OrderSide::Buy).await?;
        let buy_put = self.price_leg(&selection.otm_put, OrderSide::Buy).await?;
        Ok([sell_call, sell_put, buy_call, buy_put])
    }

    async fn price_leg(&self, contract: &OptionContract, side: OrderSide) -> Result<OrderRequest> {
        let symbol = contract.symbol.clone();
        let book = self
            .resilience
            .exec("get_order_book", || self.venue.order_book(&symbol, 5))
            .await
            .ok();
        let positive = |p: Option<Decimal>| p.filter(|v| *v > Decimal::ZERO);
        let bid = positive(book.as_ref().and_then(OrderBook::best_bid)).or(positive(contract.bid));
        let ask = positive(book.as_ref().and_then(OrderBook::best_ask)).or(positive(contract.ask));
        let price = match side {
            OrderSide::Sell => bid.or(ask),
            OrderSide::Buy => ask.or(bid),
        }
        .ok_or_else(|| {
            EngineError::internal(format!("no quote available to price {symbol} leg"))
        })?;

        Ok(OrderRequest {
            symbol,
            side,
            quantity: self.quantity,
            price,
        })
    }

    /// Submits all four legs concurrently and materializes the
    /// position from whatever filled.
    async fn execute_legs(
        &self,
        selection: &StrikeSelection,
        [sell_call, sell_put, buy_call, buy_put]: [OrderRequest; 4],
    ) -> ButterflyPosition {
        tracing::info!(target: "ironfly::trading", "submitting 4 butterfly legs concurrently");
        let (sc, sp, bc, bp) = tokio::join!(
            self.driver.drive(sell_call.clone()),
            self.driver.drive(sell_put.clone()),
            self.driver.drive(buy_call.clone()),
            self.driver.drive(buy_put.clone()),
        );

        let sell_call_leg = self.leg_from(&selection.atm_call, &sell_call, sc);
        let sell_put_leg = self.leg_from(&selection.atm_put, &sell_put, sp);
        let buy_call_leg = self.leg_from(&selection.otm_call, &buy_call, bc);
        let buy_put_leg = self.leg_from(&selection.otm_put, &buy_put, bp);

        ButterflyPosition::new(
            selection.atm_strike,
            sell_call_leg,
            sell_put_leg,
            buy_call_leg,
            buy_put_leg,
        )
    }

    fn leg_from(
        &self,
        contract: &OptionContract,
        request: &OrderRequest,
        outcome: Result<OrderResponse>,
    ) -> Leg {
        let mut leg = Leg::new(
            contract.symbol.clone(),
            contract.kind,
            contract.strike,
            request.quantity,
            request.side,
        );
        match outcome {
            Ok(response) if response.is_filled() => {
                // Always the venue-reported average, never our limit.
                let avg = response.avg_price.unwrap_or(request.price);
                leg.record_fill(avg, response.order_id);
            }
            Ok(response) => {
                tracing::warn!(
                    target: "ironfly::trading",
                    symbol = %contract.symbol,
                    status = %response.status,
                    "leg not filled, position will carry an unfilled leg"
                );
                leg.order_id = Some(response.order_id);
            }
            Err(err) => {
                tracing::error!(
                    target: "ironfly::trading",
                    symbol = %contract.symbol,
                    error = %err,
                    "leg order failed"
                );
            }
        }
        leg
    }
}
