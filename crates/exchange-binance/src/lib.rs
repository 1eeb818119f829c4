//! Binance European options REST integration.
//!
//! Provides the signed HTTP client behind the engine's venue trait:
//! HMAC-SHA256 request signing over canonical query strings, client-side
//! rate limiting, and the wire-type conversions for the `/eapi/v1`
//! endpoints.

pub mod auth;
pub mod client;

pub use auth::QuerySigner;
pub use client::{BinanceClientConfig, BinanceOptionsClient};
