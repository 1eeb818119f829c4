//! Core types for the ironfly trading engine.
//!
//! This crate holds everything shared between the engine, the venue
//! client and the CLI: the trading configuration and its validation,
//! the closed error taxonomy, the structured event taxonomy, the
//! option/order/position domain models, and the venue trait the engine
//! trades through.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod models;
pub mod venue;

pub use config::TradingConfig;
pub use config_loader::ConfigLoader;
pub use error::{EngineError, Result};
pub use events::{Event, EventKind, EventSink, TracingEventSink};
pub use models::{
    ButterflyPosition, Leg, OptionContract, OptionKind, OrderBook, OrderModifyRequest,
    OrderRequest, OrderResponse, OrderSide, OrderStatus, PortfolioRiskMetrics, PositionSnapshot,
    PositionStatus, PriceLevel, SessionState,
};
pub use venue::OptionsVenue;
