//! Idempotent batch ingestion, the authoritative side of sync.
//!
//! Items are processed one at a time with no cross-item transaction: a failure
//! on one item is reported for that item and earlier inserts stay committed.

use thiserror::Error;

use crate::error::{Error, Result};
use crate::models::{
    ActivityInput, HarvestInput, ItemError, ItemKind, LocalId, SyncBatchRequest,
    SyncBatchResponse,
};
use crate::sync::{RemoteEndpoint, TransportError, TransportResult};
use crate::util::{compact_text, fingerprint};

/// Storage operations needed to ingest batches (async)
#[allow(async_fn_in_trait)]
pub trait IngestStore {
    /// Bind a device identity to a principal unless it is already bound.
    /// Returns the principal the device ends up bound to.
    async fn register_device(&self, device_id: &str, principal_id: &str) -> Result<String>;

    /// Create a plant unless it exists. Returns the plant's owner.
    async fn register_plant(&self, plant_id: &str, owner_id: &str) -> Result<String>;

    async fn principal_for_device(&self, device_id: &str) -> Result<Option<String>>;

    async fn plant_owner(&self, plant_id: &str) -> Result<Option<String>>;

    async fn has_activity(&self, plant_id: &str, local_id: &LocalId) -> Result<bool>;

    async fn has_harvest(&self, plant_id: &str, local_id: &LocalId) -> Result<bool>;

    /// Insert unless `(plant_id, local_id)` already exists. Returns whether a row was written.
    async fn insert_activity(&self, input: &ActivityInput, device_id: &str) -> Result<bool>;

    /// Insert unless `(plant_id, local_id)` already exists. Returns whether a row was written.
    async fn insert_harvest(&self, input: &HarvestInput, device_id: &str) -> Result<bool>;
}

/// Failures that reject a whole batch
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("device identity is required")]
    MissingDevice,
    #[error("unknown device")]
    UnknownDevice,
    #[error(transparent)]
    Store(#[from] Error),
}

/// Outcome of one item
enum ItemOutcome {
    Inserted,
    Duplicate,
}

impl ItemOutcome {
    /// A lost insert race against the unique index is still a duplicate.
    const fn from_inserted(inserted: bool) -> Self {
        if inserted {
            Self::Inserted
        } else {
            Self::Duplicate
        }
    }
}

/// Ingests sync batches against an `IngestStore`.
#[derive(Clone)]
pub struct IngestService<S> {
    store: S,
}

impl<S: IngestStore> IngestService<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub async fn register_device(&self, device_id: &str, principal_id: &str) -> Result<()> {
        let device_id = required("deviceId", device_id)?;
        let principal_id = required("principalId", principal_id)?;
        let bound = self.store.register_device(device_id, principal_id).await?;
        if bound != principal_id {
            tracing::warn!(
                device = fingerprint(device_id),
                "Refused to rebind a device registered to another principal"
            );
            return Err(Error::Conflict(
                "device is registered to another principal".to_string(),
            ));
        }
        tracing::info!(device = fingerprint(device_id), "Registered device");
        Ok(())
    }

    /// Create a plant for `owner_id`. Registering it again for the same owner
    /// is a no-op; registering it for anyone else is a conflict.
    pub async fn register_plant(&self, plant_id: &str, owner_id: &str) -> Result<()> {
        let plant_id = required("plantId", plant_id)?;
        let owner_id = required("principalId", owner_id)?;
        let owner = self.store.register_plant(plant_id, owner_id).await?;
        if owner != owner_id {
            tracing::warn!(plant_id, "Refused to reassign a plant owned by another principal");
            return Err(Error::Conflict(format!("plant `{plant_id}` already has an owner")));
        }
        Ok(())
    }

    /// Ingest one batch for the device named in the request.
    pub async fn ingest(
        &self,
        request: &SyncBatchRequest,
    ) -> std::result::Result<SyncBatchResponse, IngestError> {
        let device_id = request
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(IngestError::MissingDevice)?;
        let principal = self
            .store
            .principal_for_device(device_id)
            .await?
            .ok_or(IngestError::UnknownDevice)?;

        let mut response = SyncBatchResponse::default();
        let mut duplicates = 0_u32;

        for input in &request.activities {
            match self.ingest_activity(input, device_id, &principal).await {
                Ok(outcome) => {
                    response.activities_synced += 1;
                    duplicates += u32::from(matches!(outcome, ItemOutcome::Duplicate));
                }
                Err(error) => response.errors.push(error.to_string()),
            }
        }

        for input in &request.harvests {
            match self.ingest_harvest(input, device_id, &principal).await {
                Ok(outcome) => {
                    response.harvests_synced += 1;
                    duplicates += u32::from(matches!(outcome, ItemOutcome::Duplicate));
                }
                Err(error) => response.errors.push(error.to_string()),
            }
        }

        tracing::info!(
            device = fingerprint(device_id),
            activities_synced = response.activities_synced,
            harvests_synced = response.harvests_synced,
            duplicates,
            errors = response.errors.len(),
            "Ingested sync batch"
        );
        Ok(response)
    }

    async fn ingest_activity(
        &self,
        input: &ActivityInput,
        device_id: &str,
        principal: &str,
    ) -> std::result::Result<ItemOutcome, ItemError> {
        let kind = ItemKind::Activity;
        self.authorize(kind, &input.plant_id, &input.local_id, principal)
            .await?;

        self.store_activity(input, device_id)
            .await
            .map_err(|error| item_failure(kind, &input.local_id, &error))
    }

    async fn ingest_harvest(
        &self,
        input: &HarvestInput,
        device_id: &str,
        principal: &str,
    ) -> std::result::Result<ItemOutcome, ItemError> {
        let kind = ItemKind::Harvest;
        self.authorize(kind, &input.plant_id, &input.local_id, principal)
            .await?;

        self.store_harvest(input, device_id)
            .await
            .map_err(|error| item_failure(kind, &input.local_id, &error))
    }

    async fn store_activity(&self, input: &ActivityInput, device_id: &str) -> Result<ItemOutcome> {
        if self.store.has_activity(&input.plant_id, &input.local_id).await? {
            return Ok(ItemOutcome::Duplicate);
        }
        Ok(ItemOutcome::from_inserted(
            self.store.insert_activity(input, device_id).await?,
        ))
    }

    async fn store_harvest(&self, input: &HarvestInput, device_id: &str) -> Result<ItemOutcome> {
        if self.store.has_harvest(&input.plant_id, &input.local_id).await? {
            return Ok(ItemOutcome::Duplicate);
        }
        Ok(ItemOutcome::from_inserted(
            self.store.insert_harvest(input, device_id).await?,
        ))
    }

    async fn authorize(
        &self,
        kind: ItemKind,
        plant_id: &str,
        local_id: &LocalId,
        principal: &str,
    ) -> std::result::Result<(), ItemError> {
        match self.store.plant_owner(plant_id).await {
            Ok(Some(owner)) if owner == principal => Ok(()),
            Ok(_) => Err(ItemError::unauthorized(kind, local_id.clone())),
            Err(error) => Err(item_failure(kind, local_id, &error)),
        }
    }
}

impl<S: IngestStore> RemoteEndpoint for IngestService<S> {
    async fn sync_batch(&self, request: &SyncBatchRequest) -> TransportResult<SyncBatchResponse> {
        self.ingest(request)
            .await
            .map_err(|error| TransportError::Api(error.to_string()))
    }
}

fn item_failure(kind: ItemKind, local_id: &LocalId, error: &Error) -> ItemError {
    tracing::warn!(%kind, %error, "Failed to ingest item");
    ItemError::new(kind, local_id.clone(), compact_text(&error.to_string()))
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(Error::InvalidInput(format!("{field} must not be empty")))
    } else {
        Ok(value)
    }
}
