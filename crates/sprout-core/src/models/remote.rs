//! Remote-shaped inputs and the batch wire contract

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ActivityKind, LocalId, SyncAction};

/// Activity record as the remote endpoint ingests it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInput {
    pub plant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub local_id: LocalId,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub occurred_at: i64,
}

/// Harvest record as the remote endpoint ingests it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestInput {
    pub plant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub local_id: LocalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub harvested_at: i64,
}

/// Photo record shape reserved for an object-storage upload path.
///
/// The mapper never produces one today; photos stay in the local queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoInput {
    pub plant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub local_id: LocalId,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub taken_at: i64,
}

/// One remote input produced from one queued action.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteInput {
    Photo(PhotoInput),
    Activity(ActivityInput),
    Harvest(HarvestInput),
}

/// Remote-shaped projection of one queue snapshot, partitioned by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncBatch {
    pub photos: Vec<PhotoInput>,
    pub activities: Vec<ActivityInput>,
    pub harvests: Vec<HarvestInput>,
}

impl SyncBatch {
    /// Number of items the remote endpoint can currently accept.
    pub fn syncable_len(&self) -> usize {
        self.activities.len() + self.harvests.len()
    }

    pub fn has_syncable_items(&self) -> bool {
        self.syncable_len() > 0
    }
}

/// Request body of `POST /v1/sync/batch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub activities: Vec<ActivityInput>,
    #[serde(default)]
    pub harvests: Vec<HarvestInput>,
}

impl SyncBatchRequest {
    pub fn len(&self) -> usize {
        self.activities.len() + self.harvests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Response body of `POST /v1/sync/batch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchResponse {
    pub activities_synced: u32,
    pub harvests_synced: u32,
    /// Per-item failures encoded as `<kind>:<localId>:<message>`
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Kind of an ingested item, as used in per-item error keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Activity,
    Harvest,
}

impl ItemKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Harvest => "harvest",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = ItemErrorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activity" => Ok(Self::Activity),
            "harvest" => Ok(Self::Harvest),
            other => Err(ItemErrorParseError(format!("unknown item kind `{other}`"))),
        }
    }
}

/// A single rejected item reported by the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub kind: ItemKind,
    pub local_id: LocalId,
    pub message: String,
}

impl ItemError {
    pub const UNAUTHORIZED: &'static str = "unauthorized";

    pub fn new(kind: ItemKind, local_id: LocalId, message: impl Into<String>) -> Self {
        Self {
            kind,
            local_id,
            message: message.into(),
        }
    }

    pub fn unauthorized(kind: ItemKind, local_id: LocalId) -> Self {
        Self::new(kind, local_id, Self::UNAUTHORIZED)
    }

    /// Whether this error refers to `action`.
    pub fn names(&self, action: &SyncAction) -> bool {
        self.kind.as_str() == action.kind().as_str() && &self.local_id == action.local_id()
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.local_id, self.message)
    }
}

/// Raised when an error string does not follow `<kind>:<localId>:<message>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed item error: {0}")]
pub struct ItemErrorParseError(String);

impl FromStr for ItemError {
    type Err = ItemErrorParseError;

    /// Splits on the first two colons only; the message may contain more.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let kind = parts.next().unwrap_or_default().parse::<ItemKind>()?;
        let local_id = parts
            .next()
            .ok_or_else(|| ItemErrorParseError(format!("missing localId in `{s}`")))
            .and_then(|value| {
                LocalId::parse(value).map_err(|error| ItemErrorParseError(format!("{error} in `{s}`")))
            })?;
        let message = parts.next().unwrap_or_default();

        Ok(Self::new(kind, local_id, message))
    }
}
