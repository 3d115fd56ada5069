use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sprout_core::config::{ConfigError, SyncSettings};
use sprout_core::db::{Database, LibSqlKeyValueStore};
use sprout_core::device::DeviceIdentity;
use sprout_core::queue::SyncQueue;
use sprout_core::sync::{HttpSyncEndpoint, RetryPolicy, SyncExecutor, TriggerOutcome};
use sprout_core::util::is_http_url;
use sprout_core::SyncAction;

use crate::error::CliError;

pub type ClientExecutor = SyncExecutor<LibSqlKeyValueStore, HttpSyncEndpoint>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub plant_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub local_id: String,
    pub date: i64,
    pub created_at: i64,
    pub relative_time: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub exhausted: bool,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("SPROUT_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("sprout")
        .join("sprout.db")
}

pub async fn open_store(path: &Path) -> Result<LibSqlKeyValueStore, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Database::open(path).await?;
    Ok(LibSqlKeyValueStore::new(Arc::new(db)))
}

pub fn resolve_settings(endpoint_override: Option<String>) -> Result<SyncSettings, CliError> {
    apply_endpoint_override(SyncSettings::from_env()?, endpoint_override)
}

/// `--endpoint` wins over the environment; blank leaves it untouched.
pub fn apply_endpoint_override(
    mut settings: SyncSettings,
    endpoint_override: Option<String>,
) -> Result<SyncSettings, CliError> {
    let Some(endpoint) = endpoint_override
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
    else {
        return Ok(settings);
    };

    if !is_http_url(&endpoint) {
        return Err(ConfigError::Invalid("--endpoint must start with http:// or https://".into()).into());
    }
    settings.endpoint_url = Some(endpoint);
    Ok(settings)
}

pub fn build_executor(
    store: LibSqlKeyValueStore,
    settings: &SyncSettings,
) -> Result<ClientExecutor, CliError> {
    let endpoint_url = settings
        .endpoint_url
        .as_deref()
        .ok_or(CliError::SyncNotConfigured)?;
    let endpoint = HttpSyncEndpoint::new(endpoint_url, settings.request_timeout)?;

    Ok(SyncExecutor::new(
        SyncQueue::new(store.clone()),
        DeviceIdentity::new(store),
        endpoint,
    )
    .with_retry_policy(settings.retry)
    .with_record_attempts(settings.record_attempts))
}

pub fn normalize_plant_id(plant: &str) -> Result<String, CliError> {
    let trimmed = plant.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyPlantId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Unix milliseconds or an RFC 3339 timestamp; `None` means now.
pub fn parse_timestamp(value: Option<&str>) -> Result<i64, CliError> {
    let Some(raw) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(Utc::now().timestamp_millis());
    };

    if let Ok(millis) = raw.parse::<i64>() {
        return Ok(millis);
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|date_time| date_time.timestamp_millis())
        .map_err(|_| CliError::InvalidTimestamp(raw.to_string()))
}

pub fn action_to_queue_item(action: &SyncAction, retry: &RetryPolicy, now_ms: i64) -> QueueItem {
    QueueItem {
        id: action.id.to_string(),
        plant_id: action.plant_id.clone(),
        kind: action.kind().to_string(),
        local_id: action.local_id().to_string(),
        date: action.payload().date(),
        created_at: action.created_at,
        relative_time: format_relative_time(action.created_at, now_ms),
        attempts: action.attempts(),
        last_error: action.last_error().map(str::to_string),
        exhausted: retry.is_exhausted(action.attempts()),
    }
}

pub fn format_queue_lines(items: &[QueueItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let short_id = item.id.chars().take(13).collect::<String>();
            let mut line = format!(
                "{short_id:<13}  {:<8}  plant={}  {}",
                item.kind, item.plant_id, item.relative_time
            );
            if item.attempts > 0 {
                line.push_str(&format!("  attempts={}", item.attempts));
            }
            if item.exhausted {
                line.push_str("  (gave up; run `sprout queue retry-exhausted`)");
            }
            line
        })
        .collect()
}

pub fn pending_message(count: usize) -> String {
    match count {
        0 => "Nothing waiting to sync".to_string(),
        1 => "1 item waiting to sync".to_string(),
        count => format!("{count} items waiting to sync"),
    }
}

/// Line to show for a trigger outcome, if any.
pub fn describe_outcome(outcome: &TriggerOutcome) -> Option<String> {
    match outcome {
        TriggerOutcome::Completed(summary) => Some(summary.status_message()),
        TriggerOutcome::LocalFailure(_) => {
            Some("Could not save sync progress on this device".to_string())
        }
        TriggerOutcome::Ignored | TriggerOutcome::InFlight | TriggerOutcome::Throttled { .. } => {
            None
        }
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
