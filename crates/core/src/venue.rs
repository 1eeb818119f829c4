//! The narrow seam between the engine and the venue transport.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{OptionContract, OrderBook, OrderModifyRequest, OrderRequest, OrderResponse};

/// Semantic operations the engine needs from an options venue.
///
/// Implemented by the live Binance client and by the mock venue used in
/// engine tests. All methods are fallible with the shared error
/// taxonomy; transport details (signing, rate limiting, retries at the
/// HTTP layer) stay behind this trait.
#[async_trait]
pub trait OptionsVenue: Send + Sync {
    /// Last-traded price of the BTC futures reference.
    async fn reference_price(&self) -> Result<Decimal>;

    /// All expiry dates currently listed, ascending.
    async fn available_expiries(&self) -> Result<Vec<NaiveDate>>;

    /// The option chain for one expiry, with whatever top-of-book data
    /// the venue includes.
    async fn options_chain(&self, expiry: NaiveDate) -> Result<Vec<OptionContract>>;

    /// Order book for one symbol; `depth` is an upper bound on levels.
    async fn order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook>;

    /// Places a new limit order.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse>;

    /// Reprices a resting order in place.
    async fn modify_order(&self, request: &OrderModifyRequest) -> Result<OrderResponse>;

    /// Cancels a resting order.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse>;

    /// Current status of an order.
    async fn order_status(&self, symbol: &str, order_id: &str) -> Result<OrderResponse>;
}
