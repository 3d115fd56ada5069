//! Durable key-value storage
//!
//! The sync queue, the device identity and unrelated per-entity local data
//! live under separate namespaced keys in one store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::Database;
use crate::error::Result;

/// Trait for string key-value storage (async)
#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite the value stored under `key` in a single write
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`; missing keys are not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// libSQL implementation of `KeyValueStore`, backed by the `kv_store` table
#[derive(Clone)]
pub struct LibSqlKeyValueStore {
    db: Arc<Database>,
}

impl LibSqlKeyValueStore {
    /// Create a store over a shared database handle
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl KeyValueStore for LibSqlKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .db
            .connection()
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .connection()
            .execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                libsql::params![key, value, crate::util::unix_millis_now()],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.db
            .connection()
            .execute("DELETE FROM kv_store WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}

/// In-process `KeyValueStore` for tests and ephemeral sessions
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys currently stored, in no particular order
    pub async fn keys(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn exercise(store: &impl KeyValueStore) {
        assert_eq!(store.get("sprout.plants.p1").await.unwrap(), None);

        store.set("sprout.plants.p1", "{\"name\":\"basil\"}").await.unwrap();
        store.set("sprout.plants.p1", "{\"name\":\"mint\"}").await.unwrap();
        assert_eq!(
            store.get("sprout.plants.p1").await.unwrap().as_deref(),
            Some("{\"name\":\"mint\"}")
        );

        store.remove("sprout.plants.p1").await.unwrap();
        store.remove("sprout.plants.p1").await.unwrap();
        assert_eq!(store.get("sprout.plants.p1").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_libsql_store_get_set_remove() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        exercise(&LibSqlKeyValueStore::new(db)).await;
    }

    #[tokio::test]
    async fn test_memory_store_get_set_remove() {
        exercise(&MemoryKeyValueStore::new()).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_libsql_store_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("client.db");

        {
            let db = Arc::new(Database::open(&path).await.unwrap());
            LibSqlKeyValueStore::new(db)
                .set("sprout.device.id", "1700000000000-abcdefghij")
                .await
                .unwrap();
        }

        let db = Arc::new(Database::open(&path).await.unwrap());
        let value = LibSqlKeyValueStore::new(db)
            .get("sprout.device.id")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("1700000000000-abcdefghij"));
    }
}
