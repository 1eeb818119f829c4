//! Configuration loading: TOML file merged with environment overrides.

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use crate::config::TradingConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the given TOML file, with `IRONFLY_`
    /// prefixed environment variables taking precedence (e.g.
    /// `IRONFLY_API_KEY`).
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<TradingConfig> {
        let config: TradingConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("IRONFLY_"))
            .extract()?;
        Ok(config)
    }
}
