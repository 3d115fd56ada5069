//! Action payload model
//!
//! Every payload carries a [`LocalId`], the idempotency key the remote store
//! uses to recognise a record it has already ingested. Payload fields are only
//! readable after construction, so a queued payload's key can never change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::LocalId;

/// Discriminant of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Photo,
    Activity,
    Harvest,
}

impl ActionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Activity => "activity",
            Self::Harvest => "harvest",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of care activity performed on a plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Watering,
    Fertilizing,
    Pruning,
    Custom,
}

impl ActivityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watering => "watering",
            Self::Fertilizing => "fertilizing",
            Self::Pruning => "pruning",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "watering" => Ok(Self::Watering),
            "fertilizing" => Ok(Self::Fertilizing),
            "pruning" => Ok(Self::Pruning),
            "custom" => Ok(Self::Custom),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown activity type `{other}`"
            ))),
        }
    }
}

/// A photo captured for a plant. Local-only until an object-storage upload path exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoPayload {
    local_id: LocalId,
    uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
    date: i64,
}

impl PhotoPayload {
    pub fn new(uri: impl Into<String>, date: i64) -> Self {
        Self::with_local_id(LocalId::generate(), uri, date)
    }

    pub fn with_local_id(local_id: LocalId, uri: impl Into<String>, date: i64) -> Self {
        Self {
            local_id,
            uri: uri.into(),
            note: None,
            date,
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub const fn local_id(&self) -> &LocalId {
        &self.local_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub const fn date(&self) -> i64 {
        self.date
    }
}

/// A care activity (watering, pruning, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPayload {
    local_id: LocalId,
    #[serde(rename = "type")]
    kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
    date: i64,
}

impl ActivityPayload {
    pub fn new(kind: ActivityKind, date: i64) -> Self {
        Self::with_local_id(LocalId::generate(), kind, date)
    }

    pub const fn with_local_id(local_id: LocalId, kind: ActivityKind, date: i64) -> Self {
        Self {
            local_id,
            kind,
            note: None,
            date,
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub const fn local_id(&self) -> &LocalId {
        &self.local_id
    }

    pub const fn kind(&self) -> ActivityKind {
        self.kind
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub const fn date(&self) -> i64 {
        self.date
    }
}

/// A harvest record, optionally with a measured quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestPayload {
    local_id: LocalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
    date: i64,
}

impl HarvestPayload {
    pub fn new(date: i64) -> Self {
        Self::with_local_id(LocalId::generate(), date)
    }

    pub const fn with_local_id(local_id: LocalId, date: i64) -> Self {
        Self {
            local_id,
            quantity: None,
            unit: None,
            note: None,
            date,
        }
    }

    #[must_use]
    pub fn with_quantity(mut self, quantity: Option<f64>, unit: Option<String>) -> Self {
        self.quantity = quantity;
        self.unit = unit;
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub const fn local_id(&self) -> &LocalId {
        &self.local_id
    }

    pub const fn quantity(&self) -> Option<f64> {
        self.quantity
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub const fn date(&self) -> i64 {
        self.date
    }
}

/// Payload of a queued action, one variant per [`ActionKind`].
///
/// Serializes as the bare inner payload; the discriminant travels next to it
/// as the action's `type` field (see `SyncAction`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionPayload {
    Photo(PhotoPayload),
    Activity(ActivityPayload),
    Harvest(HarvestPayload),
}

impl ActionPayload {
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Photo(_) => ActionKind::Photo,
            Self::Activity(_) => ActionKind::Activity,
            Self::Harvest(_) => ActionKind::Harvest,
        }
    }

    pub const fn local_id(&self) -> &LocalId {
        match self {
            Self::Photo(payload) => payload.local_id(),
            Self::Activity(payload) => payload.local_id(),
            Self::Harvest(payload) => payload.local_id(),
        }
    }

    pub const fn date(&self) -> i64 {
        match self {
            Self::Photo(payload) => payload.date(),
            Self::Activity(payload) => payload.date(),
            Self::Harvest(payload) => payload.date(),
        }
    }

    /// Decode a payload whose kind is known from the surrounding record.
    pub(crate) fn from_value(
        kind: ActionKind,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ActionKind::Photo => Self::Photo(serde_json::from_value(value)?),
            ActionKind::Activity => Self::Activity(serde_json::from_value(value)?),
            ActionKind::Harvest => Self::Harvest(serde_json::from_value(value)?),
        })
    }
}

impl From<PhotoPayload> for ActionPayload {
    fn from(payload: PhotoPayload) -> Self {
        Self::Photo(payload)
    }
}

impl From<ActivityPayload> for ActionPayload {
    fn from(payload: ActivityPayload) -> Self {
        Self::Activity(payload)
    }
}

impl From<HarvestPayload> for ActionPayload {
    fn from(payload: HarvestPayload) -> Self {
        Self::Harvest(payload)
    }
}
