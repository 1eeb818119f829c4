//! Domain models: option contracts, orders, legs and butterfly positions.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Options chain
// =============================================================================

/// Which side of the options chain a contract belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionKind {
    Call,
    Put,
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionKind::Call => write!(f, "CALL"),
            OptionKind::Put => write!(f, "PUT"),
        }
    }
}

/// A snapshot of one listed option contract.
///
/// Refreshed on demand from the chain endpoint; the top of book is
/// optional because the info endpoint does not always carry quotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub symbol: String,
    pub kind: OptionKind,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub ask_size: Option<Decimal>,
}

impl OptionContract {
    #[must_use]
    pub fn new(symbol: impl Into<String>, kind: OptionKind, strike: Decimal, expiry: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            strike,
            expiry,
            bid: None,
            ask: None,
            bid_size: None,
            ask_size: None,
        }
    }
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Top-of-book snapshot for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Best bid price, if the bid side is non-empty.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best ask price, if the ask side is non-empty.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that flattens a fill on this side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Venue order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// True once the venue will make no further fills against the order.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

/// A new limit order. The engine never submits market orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
}

/// An in-place reprice of a resting order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderModifyRequest {
    pub order_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
}

/// The venue's view of an order, shared by place/modify/cancel/status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub side: Option<OrderSide>,
    pub filled_quantity: Option<Decimal>,
    pub avg_price: Option<Decimal>,
    pub original_quantity: Option<Decimal>,
    pub price: Option<Decimal>,
}

impl OrderResponse {
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    #[must_use]
    pub fn is_partially_filled(&self) -> bool {
        self.status == OrderStatus::PartiallyFilled
    }

    /// Filled quantity, treating an absent field as zero.
    #[must_use]
    pub fn filled_qty(&self) -> Decimal {
        self.filled_quantity.unwrap_or(Decimal::ZERO)
    }
}

// =============================================================================
// Legs and positions
// =============================================================================

/// One of the four sides of an iron butterfly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub symbol: String,
    pub kind: OptionKind,
    pub strike: Decimal,
    pub quantity: Decimal,
    pub side: OrderSide,
    entry_price: Option<Decimal>,
    pub current_price: Option<Decimal>,
    pub order_id: Option<String>,
}

impl Leg {
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        kind: OptionKind,
        strike: Decimal,
        quantity: Decimal,
        side: OrderSide,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            strike,
            quantity,
            side,
            entry_price: None,
            current_price: None,
            order_id: None,
        }
    }

    /// Records the venue-reported fill. The entry price is write-once:
    /// a second call is ignored and returns false.
    pub fn record_fill(&mut self, avg_price: Decimal, order_id: impl Into<String>) -> bool {
        if self.entry_price.is_some() {
            return false;
        }
        self.entry_price = Some(avg_price);
        self.current_price = Some(avg_price);
        self.order_id = Some(order_id.into());
        true
    }

    #[must_use]
    pub fn entry_price(&self) -> Option<Decimal> {
        self.entry_price
    }

    /// True once the opening order filled and an entry price exists.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.entry_price.is_some()
    }

    /// Mark-to-market P&L for this leg. Sells profit when the price
    /// falls. Legs without both prices contribute zero.
    #[must_use]
    pub fn pnl(&self) -> Decimal {
        match (self.entry_price, self.current_price) {
            (Some(entry), Some(current)) => {
                let diff = current - entry;
                let diff = match self.side {
                    OrderSide::Sell => -diff,
                    OrderSide::Buy => diff,
                };
                diff * self.quantity
            }
            _ => Decimal::ZERO,
        }
    }

    /// Premium this leg contributed at entry (price × qty), zero if unfilled.
    #[must_use]
    pub fn premium(&self) -> Decimal {
        self.entry_price.map_or(Decimal::ZERO, |p| p * self.quantity)
    }
}

/// Lifecycle state of a position. Terminal once not `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    ClosedProfit,
    ClosedLoss,
    ClosedRisk,
}

impl PositionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != PositionStatus::Open
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::ClosedProfit => "CLOSED_PROFIT",
            PositionStatus::ClosedLoss => "CLOSED_LOSS",
            PositionStatus::ClosedRisk => "CLOSED_RISK",
        };
        write!(f, "{s}")
    }
}

/// An iron butterfly: short call + short put at the ATM strike, long
/// call above and long put below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButterflyPosition {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub atm_strike: Decimal,
    pub sell_call: Leg,
    pub sell_put: Leg,
    pub buy_call: Leg,
    pub buy_put: Leg,
    max_loss: Decimal,
    status: PositionStatus,
}

impl ButterflyPosition {
    /// Builds a position from its four legs and caches the max
    /// theoretical loss from the entry premiums.
    #[must_use]
    pub fn new(atm_strike: Decimal, sell_call: Leg, sell_put: Leg, buy_call: Leg, buy_put: Leg) -> Self {
        let mut position = Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            atm_strike,
            sell_call,
            sell_put,
            buy_call,
            buy_put,
            max_loss: Decimal::ZERO,
            status: PositionStatus::Open,
        };
        position.max_loss = position.compute_max_loss();
        position
    }

    #[must_use]
    pub fn status(&self) -> PositionStatus {
        self.status
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Moves the position to a terminal status. Returns false (and
    /// leaves the status untouched) when it is already terminal — a
    /// closed position never reopens and never changes close reason.
    pub fn set_status(&mut self, status: PositionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    pub fn legs(&self) -> impl Iterator<Item = &Leg> {
        [&self.sell_call, &self.sell_put, &self.buy_call, &self.buy_put].into_iter()
    }

    pub fn legs_mut(&mut self) -> impl Iterator<Item = &mut Leg> {
        [
            &mut self.sell_call,
            &mut self.sell_put,
            &mut self.buy_call,
            &mut self.buy_put,
        ]
        .into_iter()
    }

    /// Number of legs whose opening order filled.
    #[must_use]
    pub fn filled_legs(&self) -> usize {
        self.legs().filter(|l| l.is_filled()).count()
    }

    /// Current mark-to-market P&L across all four legs.
    #[must_use]
    pub fn pnl(&self) -> Decimal {
        self.legs().map(Leg::pnl).sum()
    }

    /// Net premium received: short-leg credits minus long-leg debits.
    /// Unfilled legs contribute zero.
    #[must_use]
    pub fn net_premium(&self) -> Decimal {
        let received = self.sell_call.premium() + self.sell_put.premium();
        let paid = self.buy_call.premium() + self.buy_put.premium();
        received - paid
    }

    /// Cached worst-case loss at expiry.
    #[must_use]
    pub fn max_theoretical_loss(&self) -> Decimal {
        self.max_loss
    }

    fn compute_max_loss(&self) -> Decimal {
        // Wing width × qty − net premium received.
        let wing = self.buy_call.strike - self.atm_strike;
        wing * self.sell_call.quantity - self.net_premium()
    }
}

/// Per-tick snapshot of one position, handed from the monitor to the
/// risk engine. Plain data; the receiver never touches the book.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub id: Uuid,
    pub status: PositionStatus,
    pub pnl: Decimal,
    pub net_premium: Decimal,
    pub max_loss: Decimal,
}

/// Portfolio-level risk figures derived for a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioRiskMetrics {
    pub total_max_loss: Decimal,
    pub total_mtm: Decimal,
    pub total_positions: usize,
    pub positions_with_prices: usize,
}

impl PortfolioRiskMetrics {
    /// Aggregates a batch of snapshots.
    #[must_use]
    pub fn from_snapshots(snapshots: &[PositionSnapshot]) -> Self {
        let mut metrics = Self {
            total_max_loss: Decimal::ZERO,
            total_mtm: Decimal::ZERO,
            total_positions: 0,
            positions_with_prices: 0,
        };
        for snap in snapshots.iter().filter(|s| s.status == PositionStatus::Open) {
            metrics.total_positions += 1;
            metrics.total_max_loss += snap.max_loss;
            metrics.total_mtm += snap.pnl;
            if snap.pnl != Decimal::ZERO || snap.net_premium != Decimal::ZERO {
                metrics.positions_with_prices += 1;
            }
        }
        metrics
    }
}

// =============================================================================
// Session
// =============================================================================

/// Session lifecycle. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Waiting,
    Active,
    Ended,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Waiting => "WAITING",
            SessionState::Active => "ACTIVE",
            SessionState::Ended => "ENDED",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Tests
// =============================================================================
