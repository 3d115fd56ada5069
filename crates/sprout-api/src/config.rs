use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub rate_limit_window: Duration,
    pub sync_batch_rate_limit_per_window: u32,
    pub registration_rate_limit_per_window: u32,
    pub sync_batch_max_items: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "SPROUT_API_BIND_ADDR", "127.0.0.1:8080");
        let db_path = value_or_default(&lookup, "SPROUT_API_DB_PATH", "sprout-api.db");

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let sync_batch_rate_limit_per_window =
            value_or_default(&lookup, "SYNC_BATCH_RATE_LIMIT_PER_WINDOW", "30")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "SYNC_BATCH_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]"
                            .to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&sync_batch_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "SYNC_BATCH_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let registration_rate_limit_per_window =
            value_or_default(&lookup, "REGISTRATION_RATE_LIMIT_PER_WINDOW", "60")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "REGISTRATION_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]"
                            .to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&registration_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "REGISTRATION_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let sync_batch_max_items = value_or_default(&lookup, "SYNC_BATCH_MAX_ITEMS", "500")
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::Invalid("SYNC_BATCH_MAX_ITEMS must be an integer in [1, 5000]".to_string())
            })?;
        if !(1..=5_000).contains(&sync_batch_max_items) {
            return Err(ConfigError::Invalid(
                "SYNC_BATCH_MAX_ITEMS must be in [1, 5000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            db_path,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_batch_rate_limit_per_window,
            registration_rate_limit_per_window,
            sync_batch_max_items,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
