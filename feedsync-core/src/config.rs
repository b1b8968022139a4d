// feedsync-core/src/config.rs
// Settings are loaded once and handed to each component at construction.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::exchange::utils::validate_symbol;
use crate::projection::candles::CandleEligibility;

/// Upper bound for `sync.flush_interval_secs` (one day)
pub const MAX_FLUSH_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeSettings {
    pub rest_url: String,
    pub ws_url: String,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    pub symbol: String,
    pub flush_interval_secs: u64,
    pub depth_limit: u32,
    pub depth_channel_capacity: usize,
    pub trade_limit: u32,
    pub trade_window: usize,
    pub trade_channel_capacity: usize,
    pub kline_interval: String,
    pub kline_limit: u32,
    pub kline_channel_capacity: usize,
    pub candle_eligibility: CandleEligibility,
    pub truncate_on_shutdown: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub ansi: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub database: Database,
    pub sync: SyncSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Defaults, then `config.toml` (optional), then `FEEDSYNC__SECTION__KEY` variables.
    pub fn new() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("FEEDSYNC").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Defaults only
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::builder()?.build()?.try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("exchange.rest_url", "https://api.binance.com")?
            .set_default("exchange.ws_url", "wss://stream.binance.com:9443")?
            .set_default("exchange.http_timeout_secs", 5)?
            .set_default("database.url", "sqlite:data/feedsync.db")?
            .set_default("database.max_connections", 5)?
            .set_default("sync.symbol", "BTCUSDT")?
            .set_default("sync.flush_interval_secs", 5)?
            .set_default("sync.depth_limit", 100)?
            .set_default("sync.depth_channel_capacity", 10)?
            .set_default("sync.trade_limit", 100)?
            .set_default("sync.trade_window", 100)?
            .set_default("sync.trade_channel_capacity", 100)?
            .set_default("sync.kline_interval", "1d")?
            .set_default("sync.kline_limit", 100)?
            .set_default("sync.kline_channel_capacity", 100)?
            .set_default("sync.candle_eligibility", "closed_flag")?
            .set_default("sync.truncate_on_shutdown", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.ansi", true)
    }

    /// Reject values no component can run with.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.sync.symbol = validate_symbol(&self.sync.symbol)
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        let sync = &self.sync;
        let non_zero = [
            ("sync.flush_interval_secs", sync.flush_interval_secs as usize),
            ("sync.depth_channel_capacity", sync.depth_channel_capacity),
            ("sync.trade_window", sync.trade_window),
            ("sync.trade_channel_capacity", sync.trade_channel_capacity),
            ("sync.kline_channel_capacity", sync.kline_channel_capacity),
            ("sync.depth_limit", sync.depth_limit as usize),
            ("sync.kline_limit", sync.kline_limit as usize),
            ("database.max_connections", self.database.max_connections as usize),
        ];
        if let Some((key, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Message(format!("{} must be greater than zero", key)));
        }

        if sync.flush_interval_secs > MAX_FLUSH_INTERVAL_SECS {
            return Err(ConfigError::Message(format!(
                "sync.flush_interval_secs must be at most {}",
                MAX_FLUSH_INTERVAL_SECS
            )));
        }

        if sync.kline_interval.is_empty() {
            return Err(ConfigError::Message("sync.kline_interval is empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_setup() {
        let settings = Settings::defaults().unwrap();
        assert_eq!(settings.sync.symbol, "BTCUSDT");
        assert_eq!(settings.sync.flush_interval_secs, 5);
        assert_eq!(settings.sync.trade_window, 100);
        assert_eq!(settings.sync.depth_channel_capacity, 10);
        assert_eq!(settings.sync.kline_interval, "1d");
        assert_eq!(settings.sync.candle_eligibility, CandleEligibility::ClosedFlag);
        assert!(!settings.sync.truncate_on_shutdown);
    }

    #[test]
    fn test_validate_normalises_symbol() {
        let mut settings = Settings::defaults().unwrap();
        settings.sync.symbol = "ethusdt".to_string();
        settings.validate().unwrap();
        assert_eq!(settings.sync.symbol, "ETHUSDT");
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut settings = Settings::defaults().unwrap();
        settings.sync.trade_window = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("sync.trade_window"));

        let mut settings = Settings::defaults().unwrap();
        settings.sync.symbol = "BTC/USDT".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_flush_interval() {
        let mut settings = Settings::defaults().unwrap();
        settings.sync.flush_interval_secs = MAX_FLUSH_INTERVAL_SECS;
        assert!(settings.validate().is_ok());

        settings.sync.flush_interval_secs = u64::MAX;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("sync.flush_interval_secs"));
    }

    #[test]
    fn test_legacy_eligibility_parses() {
        let settings: Settings = Settings::builder()
            .unwrap()
            .set_override("sync.candle_eligibility", "close_after_open")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.sync.candle_eligibility, CandleEligibility::CloseAfterOpen);
    }
}
