use std::path::Path;

use chrono::Utc;
use sprout_core::config::SyncSettings;
use sprout_core::db::LibSqlKeyValueStore;
use sprout_core::queue::SyncQueue;

use crate::commands::common::{
    action_to_queue_item, format_queue_lines, open_store, pending_message, QueueItem,
};
use crate::error::CliError;

pub async fn run_queue_list(
    as_json: bool,
    settings: &SyncSettings,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let items = list_queue_items(&store, settings).await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    for line in format_queue_lines(&items) {
        println!("{line}");
    }
    println!("{}", pending_message(items.len()));
    Ok(())
}

pub async fn list_queue_items(store: &LibSqlKeyValueStore, settings: &SyncSettings) -> Vec<QueueItem> {
    let now_ms = Utc::now().timestamp_millis();
    SyncQueue::new(store.clone())
        .load()
        .await
        .iter()
        .map(|action| action_to_queue_item(action, &settings.retry, now_ms))
        .collect()
}

pub async fn run_retry_exhausted(settings: &SyncSettings, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let reset = retry_exhausted(&store, settings).await?;

    match reset {
        0 => println!("Nothing to retry"),
        1 => println!("1 item will be retried on the next sync"),
        count => println!("{count} items will be retried on the next sync"),
    }
    Ok(())
}

/// Reset the items that reached the retry cap. Returns how many were reset.
pub async fn retry_exhausted(
    store: &LibSqlKeyValueStore,
    settings: &SyncSettings,
) -> Result<usize, CliError> {
    let queue = SyncQueue::new(store.clone());
    Ok(queue.retry_exhausted(&settings.retry, &[]).await?)
}
