//! Test doubles shared by the unit and integration suites: a scripted
//! venue, and recording alert/event sinks.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use ironfly_core::error::{EngineError, Result};
use ironfly_core::events::{Event, EventKind, EventSink};
use ironfly_core::models::{
    OptionContract, OrderBook, OrderModifyRequest, OrderRequest, OrderResponse, OrderSide,
    OrderStatus, PriceLevel,
};
use ironfly_core::venue::OptionsVenue;

use crate::alerts::AlertSink;

/// How the mock venue fills orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Orders fill at placement, at the requested price.
    Immediate,
    /// Orders never fill.
    Never,
    /// Orders rest until the first modification, which fills them.
    OnModify,
    /// Orders fill after this many status polls.
    AfterPolls(u32),
}

#[derive(Debug, Clone)]
struct MockOrder {
    symbol: String,
    side: OrderSide,
    quantity: Decimal,
    price: Decimal,
    polls: u32,
    filled: bool,
    canceled: bool,
}

impl MockOrder {
    fn response(&self, order_id: &str) -> OrderResponse {
        let status = if self.canceled {
            OrderStatus::Canceled
        } else if self.filled {
            OrderStatus::Filled
        } else {
            OrderStatus::New
        };
        OrderResponse {
            order_id: order_id.to_string(),
            symbol: self.symbol.clone(),
            status,
            side: Some(self.side),
            filled_quantity: Some(if self.filled { self.quantity } else { Decimal::ZERO }),
            avg_price: if self.filled { Some(self.price) } else { None },
            original_quantity: Some(self.quantity),
            price: Some(self.price),
        }
    }
}

#[derive(Default)]
struct MockState {
    reference_price: Decimal,
    expiries: Vec<NaiveDate>,
    chain: Vec<OptionContract>,
    books: HashMap<String, OrderBook>,
    failing_books: Vec<String>,
    orders: HashMap<String, MockOrder>,
    fill_mode: Option<FillMode>,
    order_error: Option<EngineError>,
    status_error: Option<EngineError>,
    placed: Vec<OrderRequest>,
}

/// Scripted in-memory venue for engine tests.
pub struct MockVenue {
    state: Mutex<MockState>,
    next_id: AtomicU32,
    total_calls: AtomicU32,
    place_calls: AtomicU32,
    modify_calls: AtomicU32,
    cancel_calls: AtomicU32,
    status_calls: AtomicU32,
    book_calls: AtomicU32,
}

impl Default for MockVenue {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVenue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            next_id: AtomicU32::new(1),
            total_calls: AtomicU32::new(0),
            place_calls: AtomicU32::new(0),
            modify_calls: AtomicU32::new(0),
            cancel_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            book_calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn with_fill_mode(mode: FillMode) -> Self {
        let venue = Self::new();
        venue.set_fill_mode(mode);
        venue
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        self.state.lock().fill_mode = Some(mode);
    }

    pub fn set_reference_price(&self, price: Decimal) {
        self.state.lock().reference_price = price;
    }

    pub fn set_expiries(&self, expiries: Vec<NaiveDate>) {
        self.state.lock().expiries = expiries;
    }

    pub fn set_chain(&self, chain: Vec<OptionContract>) {
        self.state.lock().chain = chain;
    }

    pub fn set_book(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.state.lock().books.insert(
            symbol.to_string(),
            OrderBook {
                symbol: symbol.to_string(),
                bids: vec![PriceLevel { price: bid, quantity: Decimal::ONE }],
                asks: vec![PriceLevel { price: ask, quantity: Decimal::ONE }],
            },
        );
    }

    /// Makes `order_book` fail for one symbol.
    pub fn fail_book_for(&self, symbol: &str) {
        self.state.lock().failing_books.push(symbol.to_string());
    }

    /// Makes every order operation fail with a clone of `error`.
    pub fn fail_orders_with(&self, error: EngineError) {
        self.state.lock().order_error = Some(error);
    }

    pub fn clear_order_error(&self) {
        self.state.lock().order_error = None;
    }

    /// Makes only `order_status` fail with a clone of `error`.
    pub fn fail_status_with(&self, error: EngineError) {
        self.state.lock().status_error = Some(error);
    }

    #[must_use]
    pub fn total_calls(&self) -> u32 {
        self.total_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn place_calls(&self) -> u32 {
        self.place_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn modify_calls(&self) -> u32 {
        self.modify_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn cancel_calls(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Calls that create or change venue orders.
    #[must_use]
    pub fn order_calls(&self) -> u32 {
        self.place_calls() + self.modify_calls() + self.cancel_calls()
    }

    #[must_use]
    pub fn placed_requests(&self) -> Vec<OrderRequest> {
        self.state.lock().placed.clone()
    }

    fn bump(&self, counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn order_error(&self) -> Option<EngineError> {
        self.state.lock().order_error.clone()
    }
}

#[async_trait]
impl OptionsVenue for MockVenue {
    async fn reference_price(&self) -> Result<Decimal> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().reference_price)
    }

    async fn available_expiries(&self) -> Result<Vec<NaiveDate>> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().expiries.clone())
    }

    async fn options_chain(&self, expiry: NaiveDate) -> Result<Vec<OptionContract>> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .lock()
            .chain
            .iter()
            .filter(|c| c.expiry == expiry)
            .cloned()
            .collect())
    }

    async fn order_book(&self, symbol: &str, _depth: u32) -> Result<OrderBook> {
        self.bump(&self.book_calls);
        let state = self.state.lock();
        if state.failing_books.iter().any(|s| s == symbol) {
            return Err(EngineError::network(format!("book unavailable for {symbol}")));
        }
        Ok(state.books.get(symbol).cloned().unwrap_or(OrderBook {
            symbol: symbol.to_string(),
            bids: Vec::new(),
            asks: Vec::new(),
        }))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        self.bump(&self.place_calls);
        if let Some(err) = self.order_error() {
            return Err(err);
        }
        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock();
        state.placed.push(request.clone());
        let filled = matches!(state.fill_mode, Some(FillMode::Immediate) | None);
        let order = MockOrder {
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            price: request.price,
            polls: 0,
            filled,
            canceled: false,
        };
        let response = order.response(&id);
        state.orders.insert(id, order);
        Ok(response)
    }

    async fn modify_order(&self, request: &OrderModifyRequest) -> Result<OrderResponse> {
        self.bump(&self.modify_calls);
        if let Some(err) = self.order_error() {
            return Err(err);
        }
        let mut state = self.state.lock();
        let fill_mode = state.fill_mode;
        let order = state
            .orders
            .get_mut(&request.order_id)
            .ok_or_else(|| EngineError::order(request.symbol.clone(), "unknown order"))?;
        order.price = request.price;
        if matches!(fill_mode, Some(FillMode::OnModify)) {
            order.filled = true;
        }
        Ok(order.response(&request.order_id))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse> {
        self.bump(&self.cancel_calls);
        if let Some(err) = self.order_error() {
            return Err(err);
        }
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| EngineError::order(symbol, "unknown order"))?;
        order.canceled = true;
        Ok(order.response(order_id))
    }

    async fn order_status(&self, symbol: &str, order_id: &str) -> Result<OrderResponse> {
        self.bump(&self.status_calls);
        if let Some(err) = self.order_error() {
            return Err(err);
        }
        if let Some(err) = self.state.lock().status_error.clone() {
            return Err(err);
        }
        let mut state = self.state.lock();
        let fill_mode = state.fill_mode;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| EngineError::order(symbol, "unknown order"))?;
        order.polls += 1;
        if let Some(FillMode::AfterPolls(n)) = fill_mode {
            if !order.canceled && order.polls >= n {
                order.filled = true;
            }
        }
        Ok(order.response(order_id))
    }
}

// =============================================================================
// Recording sinks
// =============================================================================

/// Alert sink that stores every message for assertions.
#[derive(Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<String>>,
    notifies: Mutex<Vec<String>>,
}

impl RecordingAlerter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().clone()
    }

    #[must_use]
    pub fn notifies(&self) -> Vec<String> {
        self.notifies.lock().clone()
    }

    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.alerts.lock().len()
    }

    #[must_use]
    pub fn alerts_containing(&self, needle: &str) -> usize {
        self.alerts.lock().iter().filter(|a| a.contains(needle)).count()
    }
}

impl AlertSink for RecordingAlerter {
    fn alert(&self, text: &str) {
        self.alerts.lock().push(text.to_string());
    }

    fn notify(&self, text: &str) {
        self.notifies.lock().push(text.to_string());
    }
}

/// Event sink that records emitted kinds.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    #[must_use]
    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}
