use std::path::Path;

use sprout_core::config::SyncSettings;
use sprout_core::sync::SyncOutcome;

use crate::commands::common::{build_executor, open_store};
use crate::error::CliError;

pub async fn run_sync(as_json: bool, settings: &SyncSettings, db_path: &Path) -> Result<(), CliError> {
    if settings.endpoint_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }

    let store = open_store(db_path).await?;
    let executor = build_executor(store, settings)?;

    match executor.execute().await? {
        SyncOutcome::AlreadyRunning => println!("A sync is already running"),
        SyncOutcome::Finished(summary) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", summary.status_message());
                if summary.exhausted_count > 0 {
                    println!(
                        "{} gave up after repeated failures; run `sprout queue retry-exhausted`",
                        summary.exhausted_count
                    );
                }
            }
        }
    }
    Ok(())
}
