//! Queued action model

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{ActionKind, ActionPayload};

/// Queue-local identifier of an action, using UUID v7 (time-sortable).
///
/// Not the idempotency key; see [`LocalId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create a new unique action ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Client-generated idempotency key carried in every payload.
///
/// Opaque to the server, which only compares it for equality within a plant.
/// Never blank and never contains `:`, so it survives the
/// `<kind>:<localId>:<message>` error encoding intact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalId(String);

/// Raised when a string cannot serve as a [`LocalId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidLocalId {
    #[error("localId must not be empty")]
    Empty,
    #[error("localId must not contain ':' (got `{0}`)")]
    ContainsSeparator(String),
}

impl LocalId {
    /// Generate a fresh key.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidLocalId> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(InvalidLocalId::Empty)
        } else if value.contains(':') {
            Err(InvalidLocalId::ContainsSeparator(value))
        } else {
            Ok(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LocalId {
    type Error = InvalidLocalId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for LocalId {
    type Error = InvalidLocalId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<LocalId> for String {
    fn from(value: LocalId) -> Self {
        value.0
    }
}

/// One pending user action awaiting delivery to the remote store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "StoredAction")]
pub struct SyncAction {
    /// Queue-local identifier
    pub id: ActionId,
    /// Plant the action refers to
    pub plant_id: String,
    /// Device that recorded the action, when known at capture time
    pub device_id: Option<String>,
    payload: ActionPayload,
    /// Capture timestamp (Unix ms)
    pub created_at: i64,
    attempts: u32,
    last_error: Option<String>,
}

impl SyncAction {
    /// Create a fresh action for a plant.
    pub fn new(plant_id: impl Into<String>, payload: impl Into<ActionPayload>) -> Self {
        Self {
            id: ActionId::new(),
            plant_id: plant_id.into(),
            device_id: None,
            payload: payload.into(),
            created_at: crate::util::unix_millis_now(),
            attempts: 0,
            last_error: None,
        }
    }

    #[must_use]
    pub fn with_device_id(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }

    pub const fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    pub const fn payload(&self) -> &ActionPayload {
        &self.payload
    }

    pub const fn local_id(&self) -> &super::LocalId {
        self.payload.local_id()
    }

    /// Number of recorded failed delivery attempts
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Message of the most recent recorded failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn record_attempt(&mut self, error: Option<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = error;
    }

    /// Copy of this action with its attempt history cleared.
    ///
    /// Identity and idempotency key are preserved.
    pub(crate) fn cleared_attempts(&self) -> Self {
        Self {
            attempts: 0,
            last_error: None,
            ..self.clone()
        }
    }
}

impl Serialize for SyncAction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        StoredActionRef {
            id: &self.id,
            plant_id: &self.plant_id,
            device_id: self.device_id.as_deref(),
            kind: self.payload.kind(),
            payload: &self.payload,
            created_at: self.created_at,
            attempts: self.attempts,
            last_error: self.last_error.as_deref(),
        }
        .serialize(serializer)
    }
}

/// Persisted layout: `{ id, plantId, deviceId?, type, payload, createdAt, attempts, lastError? }`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredActionRef<'a> {
    id: &'a ActionId,
    plant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<&'a str>,
    #[serde(rename = "type")]
    kind: ActionKind,
    payload: &'a ActionPayload,
    created_at: i64,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAction {
    id: ActionId,
    plant_id: String,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(rename = "type")]
    kind: ActionKind,
    payload: serde_json::Value,
    created_at: i64,
    #[serde(default)]
    attempts: u32,
    #[serde(default)]
    last_error: Option<String>,
}

impl TryFrom<StoredAction> for SyncAction {
    type Error = serde_json::Error;

    fn try_from(stored: StoredAction) -> Result<Self, Self::Error> {
        Ok(Self {
            id: stored.id,
            plant_id: stored.plant_id,
            device_id: stored.device_id,
            payload: ActionPayload::from_value(stored.kind, stored.payload)?,
            created_at: stored.created_at,
            attempts: stored.attempts,
            last_error: stored.last_error,
        })
    }
}
