use std::io;

use sprout_core::config::ConfigError;
use sprout_core::sync::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] sprout_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Plant ID cannot be empty")]
    EmptyPlantId,
    #[error("Photo location cannot be empty")]
    EmptyPhotoUri,
    #[error("Invalid time '{0}': use Unix milliseconds or RFC 3339")]
    InvalidTimestamp(String),
    #[error("Sync is not configured. Pass --endpoint or set SPROUT_SYNC_ENDPOINT.")]
    SyncNotConfigured,
}
