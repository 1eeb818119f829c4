//! The closed error taxonomy the whole engine matches on.
//!
//! Every worker root classifies failures through this type: recoverable
//! errors stay local (logged, throttled), non-recoverable ones raise an
//! operator alert and, when risk-classed, trigger emergency shutdown.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;

/// All failure modes of the engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Venue API fault, transient or permanent.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code; 0 when the request never reached the venue.
        status: u16,
        /// Venue error code, when the response carried one.
        code: Option<String>,
        message: String,
    },

    /// The circuit breaker refused the call outright.
    #[error("circuit breaker is OPEN for operation: {operation}")]
    CircuitOpen { operation: String },

    /// Invalid configuration. Always fatal; names the offending key.
    #[error("configuration error ({key}): {message}")]
    Config { key: &'static str, message: String },

    /// A risk threshold was breached. Always fatal.
    #[error("risk violation ({risk_type}): current {current}, threshold {threshold}")]
    Risk {
        risk_type: RiskType,
        current: rust_decimal::Decimal,
        threshold: rust_decimal::Decimal,
    },

    /// An order could not be placed, modified or cancelled.
    #[error("order execution error for {symbol}: {message}")]
    OrderExecution {
        symbol: String,
        order_id: Option<String>,
        code: Option<String>,
        message: String,
    },

    /// Anything else. Recoverable unless it reaches a worker root.
    #[error("{0}")]
    Internal(String),
}

/// Which risk rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskType {
    PortfolioStopLoss,
    PositionStopLoss,
}

impl std::fmt::Display for RiskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskType::PortfolioStopLoss => write!(f, "PORTFOLIO_STOP_LOSS"),
            RiskType::PositionStopLoss => write!(f, "POSITION_STOP_LOSS"),
        }
    }
}

impl EngineError {
    /// Creates an API error without a venue code.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Creates an API error carrying the venue's error code.
    pub fn api_coded(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Creates a network-level error (no HTTP status).
    pub fn network(message: impl Into<String>) -> Self {
        Self::Api {
            status: 0,
            code: None,
            message: message.into(),
        }
    }

    pub fn config(key: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            key,
            message: message.into(),
        }
    }

    pub fn order(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OrderExecution {
            symbol: symbol.into(),
            order_id: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// A short stable code for throttling repeated alerts.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Api { .. } if self.is_rate_limit() => "RATE_LIMIT",
            EngineError::Api { .. } => "API_ERROR",
            EngineError::CircuitOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            EngineError::Config { .. } => "CONFIG_ERROR",
            EngineError::Risk { .. } => "RISK_VIOLATION",
            EngineError::OrderExecution { .. } => "ORDER_ERROR",
            EngineError::Internal(_) => "INTERNAL",
        }
    }

    /// True for HTTP 429 or a venue code containing `RATE_LIMIT`.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        match self {
            EngineError::Api { status, code, .. } => {
                *status == 429 || code.as_deref().is_some_and(|c| c.contains("RATE_LIMIT"))
            }
            _ => false,
        }
    }

    /// True for HTTP 401/403 or signature/key venue codes.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        match self {
            EngineError::Api { status, code, .. } => {
                *status == 401
                    || *status == 403
                    || code
                        .as_deref()
                        .is_some_and(|c| c.contains("INVALID_SIGNATURE") || c.contains("INVALID_API_KEY"))
            }
            _ => false,
        }
    }

    /// Whether the caller may retry / continue after this error.
    ///
    /// Rate limits are recoverable. Any other API error with status ≥ 400
    /// is not. Transport-level faults (status 0) and internal errors
    /// default to recoverable. Configuration and risk violations never
    /// are; order failures are recoverable unless the venue reported
    /// `INSUFFICIENT_BALANCE`.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Api { status, .. } => self.is_rate_limit() || *status < 400,
            EngineError::CircuitOpen { .. } => false,
            EngineError::Config { .. } => false,
            EngineError::Risk { .. } => false,
            EngineError::OrderExecution { code, .. } => {
                !code.as_deref().is_some_and(|c| c.contains("INSUFFICIENT_BALANCE"))
            }
            EngineError::Internal(_) => true,
        }
    }
}
