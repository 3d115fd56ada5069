//! Database layer for Sprout

mod connection;
mod ingest_store;
mod kv_store;
mod migrations;

pub use connection::Database;
pub use ingest_store::LibSqlIngestStore;
pub use kv_store::{KeyValueStore, LibSqlKeyValueStore, MemoryKeyValueStore};
