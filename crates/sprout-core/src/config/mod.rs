//! Client sync configuration.
//!
//! `SyncSettings` is read from the environment by the CLI; command-line flags
//! override individual fields afterwards.

use std::collections::HashMap;
use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

use thiserror::Error;

use crate::sync::RetryPolicy;
use crate::util::is_http_url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the client side of sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Base URL of the remote endpoint; `None` keeps the client offline
    pub endpoint_url: Option<String>,
    pub request_timeout: Duration,
    /// Minimum time between completed trigger-driven attempts
    pub min_interval: Duration,
    /// Record `attempts`/`lastError` on queued actions the endpoint rejects
    pub record_attempts: bool,
    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            request_timeout: Duration::from_secs(30),
            min_interval: Duration::from_secs(15),
            record_attempts: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let endpoint_url = optional_trimmed(&lookup, "SPROUT_SYNC_ENDPOINT")
            .map(|value| value.trim_end_matches('/').to_string());
        if let Some(url) = endpoint_url.as_deref() {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "SPROUT_SYNC_ENDPOINT must start with http:// or https://".to_string(),
                ));
            }
        }

        let timeout_secs = bounded_u64(&lookup, "SPROUT_SYNC_TIMEOUT_SECS", 30, 1..=300)?;
        let min_interval_secs =
            bounded_u64(&lookup, "SPROUT_SYNC_MIN_INTERVAL_SECS", 15, 1..=3_600)?;
        let max_attempts = bounded_u64(&lookup, "SPROUT_SYNC_MAX_ATTEMPTS", 8, 1..=100)?;

        let record_attempts = optional_trimmed(&lookup, "SPROUT_SYNC_RECORD_ATTEMPTS")
            .map(|value| parse_flag("SPROUT_SYNC_RECORD_ATTEMPTS", &value))
            .transpose()?
            .unwrap_or(defaults.record_attempts);

        Ok(Self {
            endpoint_url,
            request_timeout: Duration::from_secs(timeout_secs),
            min_interval: Duration::from_secs(min_interval_secs),
            record_attempts,
            retry: RetryPolicy {
                max_attempts: u32::try_from(max_attempts).unwrap_or(u32::MAX),
                ..defaults.retry
            },
        })
    }
}

fn bounded_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };

    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{name} must be a boolean"))),
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| crate::util::normalize_text_option(Some(value)))
}
