use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const ENV_PREFIX: &str = "PERPBOT";
const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

/// Immutable runtime configuration, built once at startup and shared by every component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub market_poll_interval_secs: u64,
    pub deep_scan_interval_secs: u64,
    pub position_check_interval_secs: u64,
    pub promotion_tick_secs: u64,
    pub status_interval_secs: u64,
    pub max_concurrent_positions: usize,
    /// Fraction of capital
    pub max_position_size: f64,
    pub min_confidence: f64,
    pub deep_scan_min_confidence: f64,
    pub deep_scan_top_k: usize,
    pub min_signal_age_secs: u64,
    pub signal_expiry_secs: u64,
    pub cooldown_secs: u64,
    pub history_window: usize,
    pub max_leverage: u32,
    pub capital: f64,
    pub dry_run: bool,
    pub simulation_seed: Option<u64>,
    pub inference_enabled: bool,
    pub inference_timeout_secs: u64,
    pub inference_model: String,
    pub inference_api_key: Option<String>,
    pub market_api_url: String,
    pub inference_api_url: String,
    pub trades_path: String,
    pub account_address: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            market_poll_interval_secs: 30,
            deep_scan_interval_secs: 120,
            position_check_interval_secs: 10,
            promotion_tick_secs: 5,
            status_interval_secs: 60,
            max_concurrent_positions: 5,
            max_position_size: 0.10,
            min_confidence: 60.0,
            deep_scan_min_confidence: 60.0,
            deep_scan_top_k: 5,
            min_signal_age_secs: 10,
            signal_expiry_secs: 900,
            cooldown_secs: 300,
            history_window: 60,
            max_leverage: 10,
            capital: 10_000.0,
            dry_run: true,
            simulation_seed: None,
            inference_enabled: false,
            inference_timeout_secs: 20,
            inference_model: "gpt-4o-mini".to_string(),
            inference_api_key: None,
            market_api_url: "https://api.hyperliquid.xyz".to_string(),
            inference_api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            trades_path: "data/trades.jsonl".to_string(),
            account_address: None,
        }
    }
}

impl BotConfig {
    /// Load defaults, then the optional TOML file, then `PERPBOT_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&BotConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let mut cfg: BotConfig = settings.try_deserialize()?;
        if cfg.inference_api_key.is_none() {
            cfg.inference_api_key = std::env::var(OPENAI_KEY_VAR).ok().filter(|k| !k.is_empty());
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Bounds-check every knob and make sure required credentials are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("market_poll_interval_secs", self.market_poll_interval_secs),
            ("deep_scan_interval_secs", self.deep_scan_interval_secs),
            ("position_check_interval_secs", self.position_check_interval_secs),
            ("promotion_tick_secs", self.promotion_tick_secs),
            ("status_interval_secs", self.status_interval_secs),
            ("inference_timeout_secs", self.inference_timeout_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1 second"));
            }
        }

        if !(1..=50).contains(&self.max_concurrent_positions) {
            return Err(ConfigError::invalid(
                "max_concurrent_positions",
                format!("{} not in 1..=50", self.max_concurrent_positions),
            ));
        }
        if !(self.max_position_size > 0.0 && self.max_position_size <= 1.0) {
            return Err(ConfigError::invalid(
                "max_position_size",
                format!("{} not in (0, 1]", self.max_position_size),
            ));
        }
        for (field, value) in [
            ("min_confidence", self.min_confidence),
            ("deep_scan_min_confidence", self.deep_scan_min_confidence),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::invalid(field, format!("{} not in 0..=100", value)));
            }
        }
        if self.deep_scan_top_k == 0 {
            return Err(ConfigError::invalid("deep_scan_top_k", "must be at least 1"));
        }
        if self.signal_expiry_secs <= self.min_signal_age_secs {
            return Err(ConfigError::invalid(
                "signal_expiry_secs",
                "must be longer than min_signal_age_secs",
            ));
        }
        if self.history_window < 6 {
            return Err(ConfigError::invalid("history_window", "must keep at least 6 snapshots"));
        }
        if !(1..=50).contains(&self.max_leverage) {
            return Err(ConfigError::invalid(
                "max_leverage",
                format!("{} not in 1..=50", self.max_leverage),
            ));
        }
        if self.capital <= 0.0 {
            return Err(ConfigError::invalid("capital", "must be positive"));
        }

        if self.inference_enabled && self.inference_api_key.is_none() {
            return Err(ConfigError::MissingCredential(OPENAI_KEY_VAR));
        }
        if !self.dry_run && self.account_address.is_none() {
            return Err(ConfigError::MissingCredential("PERPBOT_ACCOUNT_ADDRESS"));
        }

        Ok(())
    }

    pub fn market_poll_interval(&self) -> Duration {
        Duration::from_secs(self.market_poll_interval_secs)
    }

    pub fn deep_scan_interval(&self) -> Duration {
        Duration::from_secs(self.deep_scan_interval_secs)
    }

    pub fn position_check_interval(&self) -> Duration {
        Duration::from_secs(self.position_check_interval_secs)
    }

    pub fn promotion_tick(&self) -> Duration {
        Duration::from_secs(self.promotion_tick_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn min_signal_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_signal_age_secs as i64)
    }

    pub fn signal_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.signal_expiry_secs as i64)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }
}
