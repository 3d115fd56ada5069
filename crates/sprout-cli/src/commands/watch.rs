use std::path::Path;
use std::time::Duration;

use sprout_core::config::SyncSettings;
use sprout_core::sync::{Connectivity, HttpSyncEndpoint, TriggerController, TriggerOutcome};

use crate::commands::common::{build_executor, describe_outcome, open_store};
use crate::error::CliError;

pub async fn run_watch(
    interval_secs: u64,
    settings: &SyncSettings,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let executor = build_executor(store, settings)?;
    let endpoint_url = settings
        .endpoint_url
        .as_deref()
        .ok_or(CliError::SyncNotConfigured)?;
    let probe = HttpSyncEndpoint::new(endpoint_url, settings.request_timeout)?;
    let controller = TriggerController::new(executor).with_min_interval(settings.min_interval);
    let interval = Duration::from_secs(interval_secs.max(1));

    tracing::info!(endpoint = probe.endpoint(), "Watching for connectivity");
    report(&controller.on_mount().await);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = tokio::time::sleep(interval) => {
                let connectivity = if probe.is_reachable().await {
                    Connectivity::online()
                } else {
                    Connectivity::offline()
                };
                report(&controller.on_connectivity_change(connectivity).await);
            }
        }
    }

    Ok(())
}

fn report(outcome: &TriggerOutcome) {
    match describe_outcome(outcome) {
        Some(line) => println!("{line}"),
        None => tracing::debug!(?outcome, "No sync attempted"),
    }
}
