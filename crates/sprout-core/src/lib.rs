//! sprout-core - Core library for Sprout
//!
//! Offline capture of plant-care actions and their delivery to the remote
//! store: the durable action queue, the batch mapper, the single-flight sync
//! executor and its trigger controller, plus the idempotent ingestion service
//! the server side runs.

pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod ingest;
pub mod models;
pub mod queue;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{ActionId, LocalId, SyncAction};
