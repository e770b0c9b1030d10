// Engine configuration. Every section has working defaults so an empty JSON object is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    ParseError(String),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rates: RateCacheConfig,
    pub drafts: DraftConfig,
    pub seats: SeatConfig,
}

// Rate cache configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateCacheConfig {
    pub base_currency: String,
    pub freshness_window_seconds: u64,
    pub snapshot_key_prefix: String,
    pub provider_url: String,
    pub request_timeout_ms: u64,
    // Minimum gap between refreshes triggered implicitly by lookups on a stale table
    pub retry_cooldown_seconds: u64,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            base_currency: "USD".to_string(),
            freshness_window_seconds: 3600,
            snapshot_key_prefix: "rates:".to_string(),
            provider_url: "https://api.exchangerate-api.com/v4/latest".to_string(),
            request_timeout_ms: 10_000,
            retry_cooldown_seconds: 60,
        }
    }
}

impl RateCacheConfig {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_seconds)
    }

    // e.g. "rates:USD"
    pub fn snapshot_key(&self) -> String {
        format!(
            "{}{}",
            self.snapshot_key_prefix,
            self.base_currency.trim().to_uppercase()
        )
    }
}

// Draft store configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    pub ttl_seconds: u64,
    pub key_prefix: String,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 24 * 60 * 60,
            key_prefix: "draft:".to_string(),
        }
    }
}

impl DraftConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

// Seat map generation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeatConfig {
    pub occupied_probability: f64,
    pub reserved_probability: f64,
    pub extra_legroom_surcharge: f64,
    pub extra_legroom_row_interval: u32,
}

impl Default for SeatConfig {
    fn default() -> Self {
        Self {
            occupied_probability: 0.30,
            reserved_probability: 0.10,
            extra_legroom_surcharge: 25.0,
            extra_legroom_row_interval: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.rates.base_currency.trim();
        if base.len() != 3 || !base.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidValue {
                field: "rates.base_currency",
                reason: format!("expected a 3-letter ISO code, got {:?}", base),
            });
        }
        if self.rates.freshness_window_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rates.freshness_window_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.drafts.ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "drafts.ttl_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }
        for (field, p) in [
            ("seats.occupied_probability", self.seats.occupied_probability),
            ("seats.reserved_probability", self.seats.reserved_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("probability {} outside [0, 1]", p),
                });
            }
        }
        if !self.seats.extra_legroom_surcharge.is_finite() || self.seats.extra_legroom_surcharge < 0.0
        {
            return Err(ConfigError::InvalidValue {
                field: "seats.extra_legroom_surcharge",
                reason: "must be a non-negative amount".to_string(),
            });
        }
        if self.seats.extra_legroom_row_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "seats.extra_legroom_row_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
