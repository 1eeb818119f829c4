//! Trading configuration and boot-time validation.
//!
//! Every knob the operator can turn lives here. `validate` runs before
//! any component is built; a violation names the offending key and the
//! process refuses to start.

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default Binance European options endpoint.
pub const DEFAULT_API_URL: &str = "https://eapi.binance.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    // API credentials
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,

    // Session window, local wall clock, half-open [start, end)
    #[serde(with = "hhmm", default = "default_session_start")]
    pub session_start: NaiveTime,
    #[serde(with = "hhmm", default = "default_session_end")]
    pub session_end: NaiveTime,

    // Cycle cadence
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_minutes: u64,
    #[serde(default = "default_number_of_cycles")]
    pub number_of_cycles: u32,

    // Butterfly shape
    #[serde(default = "default_position_quantity")]
    pub position_quantity: Decimal,
    #[serde(default = "default_strike_distance")]
    pub strike_distance: u32,

    // Risk thresholds, percent of net premium / aggregate max loss
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    #[serde(default = "default_profit_target_pct")]
    pub profit_target_pct: Decimal,
    #[serde(default = "default_portfolio_risk_pct")]
    pub portfolio_risk_pct: Decimal,

    // Order driving
    #[serde(default = "default_order_timeout")]
    pub order_timeout_seconds: u64,
    #[serde(default = "default_order_update_interval")]
    pub order_update_interval_seconds: u64,

    // Alerting, optional; both or neither
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
fn default_session_start() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 25, 0).expect("valid time")
}
fn default_session_end() -> NaiveTime {
    NaiveTime::from_hms_opt(13, 25, 0).expect("valid time")
}
fn default_cycle_interval() -> u64 {
    5
}
fn default_number_of_cycles() -> u32 {
    10
}
fn default_position_quantity() -> Decimal {
    Decimal::new(1, 2) // 0.01
}
fn default_strike_distance() -> u32 {
    10
}
fn default_stop_loss_pct() -> Decimal {
    Decimal::from(30)
}
fn default_profit_target_pct() -> Decimal {
    Decimal::from(50)
}
fn default_portfolio_risk_pct() -> Decimal {
    Decimal::from(10)
}
fn default_order_timeout() -> u64 {
    60
}
fn default_order_update_interval() -> u64 {
    1
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            api_url: default_api_url(),
            session_start: default_session_start(),
            session_end: default_session_end(),
            cycle_interval_minutes: default_cycle_interval(),
            number_of_cycles: default_number_of_cycles(),
            position_quantity: default_position_quantity(),
            strike_distance: default_strike_distance(),
            stop_loss_pct: default_stop_loss_pct(),
            profit_target_pct: default_profit_target_pct(),
            portfolio_risk_pct: default_portfolio_risk_pct(),
            order_timeout_seconds: default_order_timeout(),
            order_update_interval_seconds: default_order_update_interval(),
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

impl TradingConfig {
    /// Validates every field. The first violation is returned as a fatal
    /// configuration error naming the key.
    ///
    /// # Errors
    /// Returns `EngineError::Config` on the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().len() < 10 {
            return Err(EngineError::config("api_key", "must be at least 10 characters"));
        }
        if self.api_secret.trim().len() < 10 {
            return Err(EngineError::config("api_secret", "must be at least 10 characters"));
        }
        if self.api_url.trim().is_empty() {
            return Err(EngineError::config("api_url", "must not be empty"));
        }
        if self.session_start >= self.session_end {
            return Err(EngineError::config(
                "session_start",
                "session start must be before session end",
            ));
        }
        if self.cycle_interval_minutes == 0 {
            return Err(EngineError::config("cycle_interval_minutes", "must be positive"));
        }
        if self.number_of_cycles == 0 {
            return Err(EngineError::config("number_of_cycles", "must be positive"));
        }
        if self.position_quantity <= Decimal::ZERO {
            return Err(EngineError::config("position_quantity", "must be positive"));
        }
        if self.strike_distance == 0 {
            return Err(EngineError::config("strike_distance", "must be positive"));
        }
        if self.stop_loss_pct < Decimal::ZERO || self.stop_loss_pct >= Decimal::from(100) {
            return Err(EngineError::config("stop_loss_pct", "must be in [0, 100)"));
        }
        if self.profit_target_pct <= Decimal::ZERO {
            return Err(EngineError::config("profit_target_pct", "must be greater than 0"));
        }
        if self.portfolio_risk_pct < Decimal::ZERO || self.portfolio_risk_pct >= Decimal::from(100) {
            return Err(EngineError::config("portfolio_risk_pct", "must be in [0, 100)"));
        }
        if self.order_timeout_seconds == 0 {
            return Err(EngineError::config("order_timeout_seconds", "must be positive"));
        }
        if self.order_update_interval_seconds == 0 {
            return Err(EngineError::config(
                "order_update_interval_seconds",
                "must be positive",
            ));
        }
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), None) if !token.is_empty() => {
                return Err(EngineError::config(
                    "telegram_chat_id",
                    "bot token provided but chat id is missing",
                ));
            }
            (None, Some(chat)) if !chat.is_empty() => {
                return Err(EngineError::config(
                    "telegram_bot_token",
                    "chat id provided but bot token is missing",
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// True when both Telegram credentials are present.
    #[must_use]
    pub fn telegram_enabled(&self) -> bool {
        matches!(
            (&self.telegram_bot_token, &self.telegram_chat_id),
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty()
        )
    }

    /// API key with everything past the first 8 characters masked, for
    /// the boot-time configuration summary.
    #[must_use]
    pub fn masked_api_key(&self) -> String {
        let visible: String = self.api_key.chars().take(8).collect();
        format!("{visible}***")
    }
}

/// Serde adapter for `HH:MM` (also accepts `HH:MM:SS`) session times.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
