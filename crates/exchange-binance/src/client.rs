//! Binance European options REST client.
//!
//! Typed access to the `/eapi/v1` endpoints with client-side rate
//! limiting (governor) and HMAC-SHA256 signing for private calls. All
//! responses are converted into the domain types from `ironfly-core`;
//! venue error payloads are mapped onto the shared error taxonomy so
//! the resilience layer can classify them.
//!
//! # Example
//!
//! ```ignore
//! use ironfly_binance::{BinanceClientConfig, BinanceOptionsClient};
//! use ironfly_core::OptionsVenue;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = BinanceOptionsClient::new(
//!         BinanceClientConfig::new("api-key", "api-secret"),
//!     )?;
//!     let price = client.reference_price().await?;
//!     println!("BTC reference: {price}");
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use ironfly_core::error::{EngineError, Result};
use ironfly_core::models::{
    OptionContract, OptionKind, OrderBook, OrderModifyRequest, OrderRequest, OrderResponse,
    OrderSide, OrderStatus, PriceLevel,
};
use ironfly_core::venue::OptionsVenue;

use crate::auth::{canonical_query, QuerySigner};

// =============================================================================
// Constants
// =============================================================================

/// Production endpoint for Binance European options.
pub const BINANCE_EAPI_URL: &str = "https://eapi.binance.com";

/// Futures reference symbol used for ATM selection.
const REFERENCE_SYMBOL: &str = "BTCUSDT";

/// Underlying prefix used to filter the chain.
const UNDERLYING_PREFIX: &str = "BTC";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the options client.
#[derive(Debug, Clone)]
pub struct BinanceClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// API key sent in the `X-MBX-APIKEY` header.
    pub api_key: String,

    /// API secret used for query signing.
    pub api_secret: String,

    /// Requests per minute allowed through the client-side limiter.
    pub requests_per_minute: NonZeroU32,

    /// TCP connect timeout.
    pub connect_timeout_secs: u64,

    /// Full-request timeout.
    pub read_timeout_secs: u64,
}

impl BinanceClientConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            base_url: BINANCE_EAPI_URL.to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            requests_per_minute: nonzero!(1200u32),
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
        }
    }

    /// Sets a custom base URL (useful for tests).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the client-side rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: NonZeroU32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOptionInfo {
    symbol: String,
    strike_price: String,
    bid_price: Option<String>,
    ask_price: Option<String>,
    bid_qty: Option<String>,
    ask_qty: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDepth {
    bids: Option<Vec<Vec<String>>>,
    asks: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: serde_json::Value,
    symbol: String,
    status: Option<String>,
    side: Option<String>,
    executed_qty: Option<String>,
    avg_price: Option<String>,
    orig_qty: Option<String>,
    price: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawVenueError {
    code: Option<i64>,
    msg: Option<String>,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    value
        .parse::<Decimal>()
        .map_err(|e| EngineError::internal(format!("invalid decimal in {field}: {value} ({e})")))
}

fn parse_optional_decimal(value: Option<&String>) -> Option<Decimal> {
    value.and_then(|v| v.parse::<Decimal>().ok())
}

fn parse_order_status(status: Option<&str>) -> OrderStatus {
    match status {
        Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
        Some("FILLED") => OrderStatus::Filled,
        Some("CANCELED" | "CANCELLED") => OrderStatus::Canceled,
        Some("REJECTED") => OrderStatus::Rejected,
        Some("EXPIRED") => OrderStatus::Expired,
        // ACCEPTED is what the options API reports for a resting order.
        _ => OrderStatus::New,
    }
}

fn parse_order_side(side: Option<&str>) -> Option<OrderSide> {
    match side {
        Some("BUY") => Some(OrderSide::Buy),
        Some("SELL") => Some(OrderSide::Sell),
        _ => None,
    }
}

impl RawOrder {
    fn into_response(self) -> OrderResponse {
        let order_id = match &self.order_id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        OrderResponse {
            order_id,
            symbol: self.symbol,
            status: parse_order_status(self.status.as_deref()),
            side: parse_order_side(self.side.as_deref()),
            filled_quantity: parse_optional_decimal(self.executed_qty.as_ref()),
            avg_price: parse_optional_decimal(self.avg_price.as_ref()),
            original_quantity: parse_optional_decimal(self.orig_qty.as_ref()),
            price: parse_optional_decimal(self.price.as_ref()),
        }
    }
}

/// Parses `BTC-250801-60000-C` into (expiry, strike-kind).
fn parse_option_symbol(symbol: &str) -> Option<(NaiveDate, OptionKind)> {
    let parts: Vec<&str> = symbol.split('-').collect();
    if parts.len() < 4 {
        return None;
    }
    let expiry = NaiveDate::parse_from_str(&format!("20{}", parts[1]), "%Y%m%d").ok()?;
    let kind = match parts[3] {
        "C" => OptionKind::Call,
        "P" => OptionKind::Put,
        _ => return None,
    };
    Some((expiry, kind))
}

/// Maps the venue's numeric error codes onto the taxonomy's markers.
fn venue_error_code(code: i64) -> Option<&'static str> {
    match code {
        -1003 => Some("RATE_LIMIT"),
        -1022 => Some("INVALID_SIGNATURE"),
        -2014 | -2015 => Some("INVALID_API_KEY"),
        -2018 | -4051 => Some("INSUFFICIENT_BALANCE"),
        _ => None,
    }
}

// =============================================================================
// Client
// =============================================================================

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// REST client for Binance European options, implementing
/// [`OptionsVenue`]. All requests pass the client-side rate limiter;
/// private requests carry a signed canonical query.
pub struct BinanceOptionsClient {
    config: BinanceClientConfig,
    http: Client,
    rate_limiter: Arc<DirectLimiter>,
    signer: QuerySigner,
}

impl std::fmt::Debug for BinanceOptionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceOptionsClient")
            .field("base_url", &self.config.base_url)
            .field("requests_per_minute", &self.config.requests_per_minute)
            .finish_non_exhaustive()
    }
}

impl BinanceOptionsClient {
    /// Creates a new client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: BinanceClientConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| EngineError::network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_minute(config.requests_per_minute);
        let signer = QuerySigner::new(config.api_secret.clone());

        Ok(Self {
            config,
            http,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            signer,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn timestamp_millis() -> String {
        Utc::now().timestamp_millis().to_string()
    }

    /// Public (unsigned) GET.
    async fn get_public<T: serde::de::DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.config.base_url, path_and_query);
        tracing::debug!(target: "ironfly::venue", "GET {url}");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::handle_response(response).await
    }

    /// Signed GET: the canonical query plus signature go in the URL.
    async fn get_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let query = self.signer.signed_query(&canonical_query(params));
        let url = format!("{}{}?{}", self.config.base_url, path, query);
        tracing::debug!(target: "ironfly::venue", "GET {}{path} (signed)", self.config.base_url);

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::handle_response(response).await
    }

    /// Signed POST: the canonical query plus signature form the body.
    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let body = self.signer.signed_query(&canonical_query(params));
        let url = format!("{}{}", self.config.base_url, path);
        tracing::debug!(target: "ironfly::venue", "POST {url} body_len={}", body.len());

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::handle_response(response).await
    }

    /// Signed DELETE with the query in the URL.
    async fn delete_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let query = self.signer.signed_query(&canonical_query(params));
        let url = format!("{}{}?{}", self.config.base_url, path, query);
        tracing::debug!(target: "ironfly::venue", "DELETE {}{path} (signed)", self.config.base_url);

        let response = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::handle_response(response).await
    }

    /// Converts a non-success response into a classified error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let venue: Option<RawVenueError> = serde_json::from_str(&text).ok();
            let message = venue
                .as_ref()
                .and_then(|v| v.msg.clone())
                .unwrap_or_else(|| text.clone());

            if status.as_u16() == 429 {
                return Err(EngineError::api_coded(429, "RATE_LIMIT", message));
            }

            let code = venue
                .and_then(|v| v.code)
                .and_then(venue_error_code)
                .map(str::to_string);
            return Err(EngineError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| EngineError::internal(format!("failed to decode venue response: {e}")))
    }

    async fn fetch_option_info(&self) -> Result<Vec<RawOptionInfo>> {
        self.get_public("/eapi/v1/optionInfo").await
    }
}

fn map_transport_error(err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::network(format!("request timeout: {err}"))
    } else if err.is_connect() {
        EngineError::network(format!("connection failed: {err}"))
    } else {
        EngineError::network(err.to_string())
    }
}

#[async_trait]
impl OptionsVenue for BinanceOptionsClient {
    async fn reference_price(&self) -> Result<Decimal> {
        let raw: serde_json::Value = self
            .get_public(&format!("/eapi/v1/ticker?symbol={REFERENCE_SYMBOL}"))
            .await?;

        // The ticker endpoint returns an array when queried broadly and
        // a bare object for a single symbol.
        let entry = match &raw {
            serde_json::Value::Array(items) => items.first().ok_or_else(|| {
                EngineError::internal("empty ticker response for reference price")
            })?,
            other => other,
        };
        let last = entry
            .get("lastPrice")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::internal("ticker response missing lastPrice"))?;
        parse_decimal("lastPrice", last)
    }

    async fn available_expiries(&self) -> Result<Vec<NaiveDate>> {
        let contracts = self.fetch_option_info().await?;

        let mut expiries: Vec<NaiveDate> = Vec::new();
        for info in &contracts {
            if !info.symbol.starts_with(UNDERLYING_PREFIX) {
                continue;
            }
            if let Some((expiry, _)) = parse_option_symbol(&info.symbol) {
                if !expiries.contains(&expiry) {
                    expiries.push(expiry);
                }
            }
        }
        expiries.sort_unstable();
        tracing::debug!(target: "ironfly::venue", "found {} listed expiries", expiries.len());
        Ok(expiries)
    }

    async fn options_chain(&self, expiry: NaiveDate) -> Result<Vec<OptionContract>> {
        let raw = self.fetch_option_info().await?;

        let mut contracts = Vec::new();
        for info in raw {
            if !info.symbol.starts_with(UNDERLYING_PREFIX) {
                continue;
            }
            let Some((contract_expiry, kind)) = parse_option_symbol(&info.symbol) else {
                tracing::warn!(target: "ironfly::venue", symbol = %info.symbol, "unparseable option symbol");
                continue;
            };
            if contract_expiry != expiry {
                continue;
            }
            let strike = parse_decimal("strikePrice", &info.strike_price)?;
            let mut contract = OptionContract::new(info.symbol.clone(), kind, strike, contract_expiry);
            contract.bid = parse_optional_decimal(info.bid_price.as_ref());
            contract.ask = parse_optional_decimal(info.ask_price.as_ref());
            contract.bid_size = parse_optional_decimal(info.bid_qty.as_ref());
            contract.ask_size = parse_optional_decimal(info.ask_qty.as_ref());
            contracts.push(contract);
        }
        tracing::debug!(
            target: "ironfly::venue",
            "retrieved {} contracts for expiry {expiry}",
            contracts.len()
        );
        Ok(contracts)
    }

    async fn order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook> {
        let raw: RawDepth = self
            .get_public(&format!("/eapi/v1/depth?symbol={symbol}&limit={}", depth.min(100)))
            .await?;

        let parse_side = |levels: Option<Vec<Vec<String>>>| -> Vec<PriceLevel> {
            levels
                .unwrap_or_default()
                .into_iter()
                .filter(|l| l.len() >= 2)
                .filter_map(|l| {
                    Some(PriceLevel {
                        price: l[0].parse().ok()?,
                        quantity: l[1].parse().ok()?,
                    })
                })
                .collect()
        };

        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: parse_side(raw.bids),
            asks: parse_side(raw.asks),
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let params = [
            ("symbol", request.symbol.clone()),
            ("side", request.side.to_string()),
            ("type", "LIMIT".to_string()),
            ("quantity", request.quantity.to_string()),
            ("price", request.price.to_string()),
            ("timestamp", Self::timestamp_millis()),
        ];
        let raw: RawOrder = self.post_signed("/eapi/v1/order", &params).await?;
        let response = raw.into_response();
        tracing::info!(
            target: "ironfly::venue",
            order_id = %response.order_id,
            symbol = %response.symbol,
            side = %request.side,
            price = %request.price,
            "order placed"
        );
        Ok(response)
    }

    async fn modify_order(&self, request: &OrderModifyRequest) -> Result<OrderResponse> {
        let params = [
            ("symbol", request.symbol.clone()),
            ("orderId", request.order_id.clone()),
            ("quantity", request.quantity.to_string()),
            ("price", request.price.to_string()),
            ("timestamp", Self::timestamp_millis()),
        ];
        let raw: RawOrder = self.post_signed("/eapi/v1/order", &params).await?;
        Ok(raw.into_response())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
            ("timestamp", Self::timestamp_millis()),
        ];
        let raw: RawOrder = self.delete_signed("/eapi/v1/order", &params).await?;
        Ok(raw.into_response())
    }

    async fn order_status(&self, symbol: &str, order_id: &str) -> Result<OrderResponse> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
            ("timestamp", Self::timestamp_millis()),
        ];
        let raw: RawOrder = self.get_signed("/eapi/v1/order", &params).await?;
        Ok(raw.into_response())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> BinanceOptionsClient {
        BinanceOptionsClient::new(
            BinanceClientConfig::new("test-api-key-000", "test-api-secret-0").with_base_url(base_url),
        )
        .unwrap()
    }

    // ==================== Symbol Parsing Tests ====================

    #[test]
    fn parses_call_and_put_symbols() {
        let (expiry, kind) = parse_option_symbol("BTC-250801-60000-C").unwrap();
        assert_eq!(expiry, NaiveDate::from_ymd_opt(2025, 8, 1).unwrap());
        assert_eq!(kind, OptionKind::Call);

        let (_, kind) = parse_option_symbol("BTC-250801-58000-P").unwrap();
        assert_eq!(kind, OptionKind::Put);
    }

    #[test]
    fn rejects_malformed_symbols() {
        assert!(parse_option_symbol("BTCUSDT").is_none());
        assert!(parse_option_symbol("BTC-250801-60000-X").is_none());
        assert!(parse_option_symbol("BTC-badday-60000-C").is_none());
    }

    // ==================== Status Mapping Tests ====================

    #[test]
    fn order_status_mapping() {
        assert_eq!(parse_order_status(Some("FILLED")), OrderStatus::Filled);
        assert_eq!(parse_order_status(Some("PARTIALLY_FILLED")), OrderStatus::PartiallyFilled);
        assert_eq!(parse_order_status(Some("CANCELED")), OrderStatus::Canceled);
        assert_eq!(parse_order_status(Some("ACCEPTED")), OrderStatus::New);
        assert_eq!(parse_order_status(None), OrderStatus::New);
    }

    #[test]
    fn numeric_order_ids_become_strings() {
        let raw = RawOrder {
            order_id: serde_json::json!(4611875134427365377u64),
            symbol: "BTC-250801-60000-C".to_string(),
            status: Some("FILLED".to_string()),
            side: Some("SELL".to_string()),
            executed_qty: Some("0.01".to_string()),
            avg_price: Some("498.5".to_string()),
            orig_qty: Some("0.01".to_string()),
            price: Some("500".to_string()),
        };
        let response = raw.into_response();
        assert_eq!(response.order_id, "4611875134427365377");
        assert!(response.is_filled());
        assert_eq!(response.avg_price, Some(dec!(498.5)));
    }

    // ==================== HTTP Tests ====================

    #[tokio::test]
    async fn reference_price_parses_object_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eapi/v1/ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "BTCUSDT",
                "lastPrice": "61234.50"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert_eq!(client.reference_price().await.unwrap(), dec!(61234.50));
    }

    #[tokio::test]
    async fn reference_price_parses_array_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eapi/v1/ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "symbol": "BTCUSDT", "lastPrice": "60000.1" }
            ])))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert_eq!(client.reference_price().await.unwrap(), dec!(60000.1));
    }

    #[tokio::test]
    async fn chain_filters_by_expiry_and_parses_quotes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eapi/v1/optionInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "symbol": "BTC-250801-60000-C", "strikePrice": "60000",
                  "bidPrice": "500", "askPrice": "520" },
                { "symbol": "BTC-250801-60000-P", "strikePrice": "60000" },
                { "symbol": "BTC-250815-60000-C", "strikePrice": "60000" },
                { "symbol": "ETH-250801-3000-C", "strikePrice": "3000" }
            ])))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let expiry = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let chain = client.options_chain(expiry).await.unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].bid, Some(dec!(500)));
        assert_eq!(chain[0].ask, Some(dec!(520)));
        assert!(chain.iter().all(|c| c.expiry == expiry));

        let expiries = client.available_expiries().await.unwrap();
        assert_eq!(
            expiries,
            vec![expiry, NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()]
        );
    }

    #[tokio::test]
    async fn depth_parses_top_of_book() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eapi/v1/depth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bids": [["495.5", "1.2"], ["490.0", "3.0"]],
                "asks": [["505.0", "0.8"]]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let book = client.order_book("BTC-250801-60000-C", 5).await.unwrap();
        assert_eq!(book.best_bid(), Some(dec!(495.5)));
        assert_eq!(book.best_ask(), Some(dec!(505.0)));
        assert_eq!(book.bids.len(), 2);
    }

    #[tokio::test]
    async fn place_order_maps_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/eapi/v1/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orderId": 123456,
                "symbol": "BTC-250801-60000-C",
                "status": "ACCEPTED",
                "side": "SELL",
                "executedQty": "0",
                "origQty": "0.01",
                "price": "500"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let request = OrderRequest {
            symbol: "BTC-250801-60000-C".to_string(),
            side: OrderSide::Sell,
            quantity: dec!(0.01),
            price: dec!(500),
        };
        let response = client.place_order(&request).await.unwrap();
        assert_eq!(response.order_id, "123456");
        assert_eq!(response.status, OrderStatus::New);
        assert_eq!(response.original_quantity, Some(dec!(0.01)));
    }

    #[tokio::test]
    async fn signature_error_maps_to_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/eapi/v1/order"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": -1022,
                "msg": "Signature for this request is not valid."
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let request = OrderRequest {
            symbol: "BTC-250801-60000-C".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(0.01),
            price: dec!(500),
        };
        let err = client.place_order(&request).await.unwrap_err();
        assert!(err.is_auth());
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn http_429_maps_to_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eapi/v1/depth"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "code": -1003,
                "msg": "Too many requests."
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.order_book("BTC-250801-60000-C", 5).await.unwrap_err();
        assert!(err.is_rate_limit());
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn cancel_and_status_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/eapi/v1/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orderId": "42", "symbol": "BTC-250801-60000-C", "status": "CANCELED"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eapi/v1/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orderId": "42", "symbol": "BTC-250801-60000-C", "status": "PARTIALLY_FILLED",
                "executedQty": "0.004", "origQty": "0.01", "avgPrice": "501.2"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let cancelled = client.cancel_order("BTC-250801-60000-C", "42").await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Canceled);

        let status = client.order_status("BTC-250801-60000-C", "42").await.unwrap();
        assert!(status.is_partially_filled());
        assert_eq!(status.filled_qty(), dec!(0.004));
    }
}
