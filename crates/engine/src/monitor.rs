//! Position ownership and the 1 Hz mark-to-market loop.
//!
//! The [`PositionBook`] is the single owner of every position the
//! engine has created, guarded by one lock; the price cache is a
//! concurrent map shared with the closer. The [`PositionMonitor`]
//! refreshes the top of book for every symbol of every open position
//! once a second and streams per-tick snapshots to the risk engine
//! over a channel — the monitor never mutates position status and
//! never calls the risk engine directly.

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use ironfly_core::models::{ButterflyPosition, OrderSide, PositionSnapshot, PositionStatus};
use ironfly_core::venue::OptionsVenue;

use crate::alerts::{AlertSink, AlertThrottle};
use crate::resilience::Resilience;
use crate::ShutdownToken;

/// Cached top of book for one symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quote {
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

/// Owner of the position set plus the shared price cache.
#[derive(Default)]
pub struct PositionBook {
    positions: RwLock<Vec<ButterflyPosition>>,
    quotes: DashMap<String, Quote>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a freshly built position.
    pub fn register(&self, position: ButterflyPosition) -> Uuid {
        let id = position.id;
        let mut positions = self.positions.write();
        positions.push(position);
        tracing::info!(
            target: "ironfly::positions",
            position_id = %id,
            total = positions.len(),
            "position registered"
        );
        id
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<ButterflyPosition> {
        self.positions.read().iter().find(|p| p.id == id).cloned()
    }

    #[must_use]
    pub fn open_positions(&self) -> Vec<ButterflyPosition> {
        self.positions.read().iter().filter(|p| p.is_open()).cloned().collect()
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.positions.read().iter().filter(|p| p.is_open()).count()
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.positions.read().len()
    }

    /// Distinct symbols across the filled legs of open positions.
    #[must_use]
    pub fn open_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        for position in self.positions.read().iter().filter(|p| p.is_open()) {
            for leg in position.legs().filter(|l| l.is_filled()) {
                if !symbols.contains(&leg.symbol) {
                    symbols.push(leg.symbol.clone());
                }
            }
        }
        symbols
    }

    /// Applies a fresh quote: sell legs mark at the bid (the buy-back
    /// price), buy legs at the ask. Also feeds the shared cache.
    pub fn apply_quote(&self, symbol: &str, quote: Quote) {
        self.quotes.insert(symbol.to_string(), quote);
        let mut positions = self.positions.write();
        for position in positions.iter_mut().filter(|p| p.is_open()) {
            for leg in position.legs_mut() {
                if leg.symbol != symbol {
                    continue;
                }
                let price = match leg.side {
                    OrderSide::Sell => quote.bid,
                    OrderSide::Buy => quote.ask,
                };
                if let Some(price) = price.filter(|p| *p > Decimal::ZERO) {
                    leg.current_price = Some(price);
                }
            }
        }
    }

    #[must_use]
    pub fn cached_quote(&self, symbol: &str) -> Option<Quote> {
        self.quotes.get(symbol).map(|q| *q)
    }

    /// Per-tick snapshots of every open position.
    #[must_use]
    pub fn snapshot_open(&self) -> Vec<PositionSnapshot> {
        self.positions
            .read()
            .iter()
            .filter(|p| p.is_open())
            .map(|p| PositionSnapshot {
                id: p.id,
                status: p.status(),
                pnl: p.pnl(),
                net_premium: p.net_premium(),
                max_loss: p.max_theoretical_loss(),
            })
            .collect()
    }

    /// Moves a position to a terminal status. Returns false when the
    /// position is unknown or already terminal.
    pub fn set_status(&self, id: Uuid, status: PositionStatus) -> bool {
        let mut positions = self.positions.write();
        match positions.iter_mut().find(|p| p.id == id) {
            Some(position) => position.set_status(status),
            None => false,
        }
    }
}

/// The 1 Hz monitoring worker.
pub struct PositionMonitor {
    book: Arc<PositionBook>,
    venue: Arc<dyn OptionsVenue>,
    resilience: Resilience,
    snapshots: mpsc::Sender<Vec<PositionSnapshot>>,
    alerts: Arc<dyn AlertSink>,
    throttle: AlertThrottle,
    tick_interval: Duration,
    shutdown: ShutdownToken,
}

impl PositionMonitor {
    #[must_use]
    pub fn new(
        book: Arc<PositionBook>,
        venue: Arc<dyn OptionsVenue>,
        resilience: Resilience,
        snapshots: mpsc::Sender<Vec<PositionSnapshot>>,
        alerts: Arc<dyn AlertSink>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            book,
            venue,
            resilience,
            snapshots,
            alerts,
            throttle: AlertThrottle::default(),
            tick_interval: Duration::from_secs(1),
            shutdown,
        }
    }

    /// Replaces the repeat-error throttle. Test hook.
    #[must_use]
    pub fn with_throttle(mut self, throttle: AlertThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Runs until shutdown.
    pub async fn run(mut self) {
        tracing::info!(target: "ironfly::positions", "position monitor started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.tick_interval) => {}
                () = self.shutdown.cancelled() => break,
            }
            self.tick().await;
        }
        tracing::info!(target: "ironfly::positions", "position monitor stopped");
    }

    /// One monitoring pass: refresh every open symbol, then hand the
    /// tick's snapshots to the risk engine. A failed symbol is skipped;
    /// the rest of the tick still runs.
    pub async fn tick(&self) {
        let symbols = self.book.open_symbols();
        if symbols.is_empty() {
            return;
        }

        for symbol in symbols {
            let fetched = self
                .resilience
                .exec("monitor_book", || self.venue.order_book(&symbol, 1))
                .await;
            match fetched {
                Ok(book) => {
                    self.book.apply_quote(
                        &symbol,
                        Quote {
                            bid: book.best_bid(),
                            ask: book.best_ask(),
                        },
                    );
                }
                Err(err) => {
                    tracing::debug!(
                        target: "ironfly::positions",
                        symbol = %symbol,
                        error = %err,
                        "price update failed, skipping symbol this tick"
                    );
                    // Recoverable failures stay local; only a streak of
                    // the same error is worth one operator line.
                    let escalate = if err.is_rate_limit() {
                        self.throttle.should_alert_rate_limit("monitor_book")
                    } else {
                        self.throttle.should_alert(err.error_code(), &symbol)
                    };
                    if escalate {
                        self.alerts.alert(&format!(
                            "POSITION ⚠️ repeated price-update failures\nSymbol: {symbol}\nError: {err}",
                        ));
                    }
                }
            }
        }

        let snapshots = self.book.snapshot_open();
        if self.snapshots.try_send(snapshots).is_err() {
            // Risk engine is behind; the next tick carries fresher data.
            tracing::debug!(target: "ironfly::positions", "snapshot channel full, dropping tick");
        }
    }
}
