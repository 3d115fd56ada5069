//! Data models for Sprout

mod action;
mod payload;
mod remote;

pub use action::{ActionId, InvalidLocalId, LocalId, SyncAction};
pub use payload::{
    ActionKind, ActionPayload, ActivityKind, ActivityPayload, HarvestPayload, PhotoPayload,
};
pub use remote::{
    ActivityInput, HarvestInput, ItemError, ItemErrorParseError, ItemKind, PhotoInput,
    RemoteInput, SyncBatch, SyncBatchRequest, SyncBatchResponse,
};
