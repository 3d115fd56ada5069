//! Error types for sprout-core

use thiserror::Error;

/// Result type alias using sprout-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sprout-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The resource is already bound to someone else
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An action with the same id is already queued
    #[error("Action already queued: {0}")]
    DuplicateAction(String),
}
