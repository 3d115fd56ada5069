use std::path::Path;

use sprout_core::db::LibSqlKeyValueStore;
use sprout_core::device::DeviceIdentity;
use sprout_core::models::{ActionPayload, ActivityPayload, HarvestPayload, PhotoPayload};
use sprout_core::queue::SyncQueue;
use sprout_core::util::normalize_text_option;
use sprout_core::SyncAction;

use crate::cli::LogCommands;
use crate::commands::common::{normalize_plant_id, open_store, parse_timestamp, pending_message};
use crate::error::CliError;

pub async fn run_log(command: LogCommands, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let action = log_action(command, &store).await?;
    let pending = SyncQueue::new(store).load().await.len();

    println!(
        "Saved {} for {}. {}",
        describe_payload(action.payload()),
        action.plant_id,
        pending_message(pending)
    );
    Ok(())
}

/// Build the action for `command` and append it to the queue.
pub async fn log_action(
    command: LogCommands,
    store: &LibSqlKeyValueStore,
) -> Result<SyncAction, CliError> {
    let (plant, payload) = payload_for(command)?;

    let device_id = match DeviceIdentity::new(store.clone()).device_id().await {
        Ok(device_id) => Some(device_id),
        Err(error) => {
            tracing::warn!(error = %error, "Recording action without a device id");
            None
        }
    };

    let action = SyncAction::new(plant, payload).with_device_id(device_id);
    SyncQueue::new(store.clone()).enqueue(action.clone()).await?;
    Ok(action)
}

fn payload_for(command: LogCommands) -> Result<(String, ActionPayload), CliError> {
    match command {
        LogCommands::Activity {
            plant,
            kind,
            note,
            at,
        } => {
            let payload = ActivityPayload::new(kind.into(), parse_timestamp(at.as_deref())?)
                .with_note(normalize_text_option(note));
            Ok((normalize_plant_id(&plant)?, payload.into()))
        }
        LogCommands::Harvest {
            plant,
            quantity,
            unit,
            note,
            at,
        } => {
            let payload = HarvestPayload::new(parse_timestamp(at.as_deref())?)
                .with_quantity(quantity, normalize_text_option(unit))
                .with_note(normalize_text_option(note));
            Ok((normalize_plant_id(&plant)?, payload.into()))
        }
        LogCommands::Photo {
            plant,
            uri,
            note,
            at,
        } => {
            let uri = uri.trim();
            if uri.is_empty() {
                return Err(CliError::EmptyPhotoUri);
            }
            let payload = PhotoPayload::new(uri, parse_timestamp(at.as_deref())?)
                .with_note(normalize_text_option(note));
            Ok((normalize_plant_id(&plant)?, payload.into()))
        }
    }
}

fn describe_payload(payload: &ActionPayload) -> String {
    match payload {
        ActionPayload::Activity(activity) => activity.kind().to_string(),
        ActionPayload::Harvest(_) => "harvest".to_string(),
        ActionPayload::Photo(_) => "photo".to_string(),
    }
}
