//! Remote-side storage for idempotent ingestion

use std::sync::Arc;

use libsql::Value;

use super::Database;
use crate::error::{Error, Result};
use crate::ingest::IngestStore;
use crate::models::{ActivityInput, HarvestInput, ItemKind, LocalId};

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, text)
}

/// libSQL implementation of `IngestStore`
#[derive(Clone)]
pub struct LibSqlIngestStore {
    db: Arc<Database>,
}

impl LibSqlIngestStore {
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Number of stored records of `kind` for a plant
    pub async fn count_records(&self, kind: ItemKind, plant_id: &str) -> Result<u64> {
        let sql = match kind {
            ItemKind::Activity => "SELECT COUNT(*) FROM activities WHERE plant_id = ?",
            ItemKind::Harvest => "SELECT COUNT(*) FROM harvests WHERE plant_id = ?",
        };
        let mut rows = self.db.connection().query(sql, [plant_id]).await?;
        let count = match rows.next().await? {
            Some(row) => u64::try_from(row.get::<i64>(0)?).unwrap_or_default(),
            None => 0,
        };
        Ok(count)
    }

    async fn lookup(&self, sql: &str, key: &str) -> Result<Option<String>> {
        let mut rows = self.db.connection().query(sql, [key]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    /// Insert-if-absent returning whichever principal the key is bound to.
    async fn bind(&self, sql: &str, key: &str, principal: &str) -> Result<String> {
        let mut rows = self
            .db
            .connection()
            .query(sql, libsql::params![key, principal, crate::util::unix_millis_now()])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<String>(0)?),
            None => Err(Error::InvalidInput(format!("`{key}` could not be registered"))),
        }
    }

    async fn exists(&self, sql: &str, plant_id: &str, local_id: &LocalId) -> Result<bool> {
        let mut rows = self
            .db
            .connection()
            .query(sql, [plant_id, local_id.as_str()])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i32>(0)? != 0),
            None => Ok(false),
        }
    }
}

impl IngestStore for LibSqlIngestStore {
    async fn register_device(&self, device_id: &str, principal_id: &str) -> Result<String> {
        self.bind(
            "INSERT INTO devices (device_id, principal_id, registered_at) VALUES (?, ?, ?)
             ON CONFLICT(device_id) DO UPDATE SET principal_id = devices.principal_id
             RETURNING principal_id",
            device_id,
            principal_id,
        )
        .await
    }

    async fn register_plant(&self, plant_id: &str, owner_id: &str) -> Result<String> {
        self.bind(
            "INSERT INTO plants (id, owner_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET owner_id = plants.owner_id
             RETURNING owner_id",
            plant_id,
            owner_id,
        )
        .await
    }

    async fn principal_for_device(&self, device_id: &str) -> Result<Option<String>> {
        self.lookup(
            "SELECT principal_id FROM devices WHERE device_id = ?",
            device_id,
        )
        .await
    }

    async fn plant_owner(&self, plant_id: &str) -> Result<Option<String>> {
        self.lookup("SELECT owner_id FROM plants WHERE id = ?", plant_id)
            .await
    }

    async fn has_activity(&self, plant_id: &str, local_id: &LocalId) -> Result<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM activities WHERE plant_id = ? AND local_id = ?)",
            plant_id,
            local_id,
        )
        .await
    }

    async fn has_harvest(&self, plant_id: &str, local_id: &LocalId) -> Result<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM harvests WHERE plant_id = ? AND local_id = ?)",
            plant_id,
            local_id,
        )
        .await
    }

    async fn insert_activity(&self, input: &ActivityInput, device_id: &str) -> Result<bool> {
        let params = vec![
            text(&input.plant_id),
            text(input.local_id.as_str()),
            text(input.kind.as_str()),
            optional_text(input.note.as_deref()),
            Value::Integer(input.occurred_at),
            text(input.device_id.as_deref().unwrap_or(device_id)),
            Value::Integer(crate::util::unix_millis_now()),
        ];
        let inserted = self
            .db
            .connection()
            .execute(
                "INSERT OR IGNORE INTO activities
                    (plant_id, local_id, kind, note, occurred_at, device_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params,
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn insert_harvest(&self, input: &HarvestInput, device_id: &str) -> Result<bool> {
        let params = vec![
            text(&input.plant_id),
            text(input.local_id.as_str()),
            input.quantity.map_or(Value::Null, Value::Real),
            optional_text(input.unit.as_deref()),
            optional_text(input.note.as_deref()),
            Value::Integer(input.harvested_at),
            text(input.device_id.as_deref().unwrap_or(device_id)),
            Value::Integer(crate::util::unix_millis_now()),
        ];
        let inserted = self
            .db
            .connection()
            .execute(
                "INSERT OR IGNORE INTO harvests
                    (plant_id, local_id, quantity, unit, note, harvested_at, device_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params,
            )
            .await?;
        Ok(inserted > 0)
    }
}
