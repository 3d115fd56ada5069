//! Queued action to remote input mapping

use crate::models::{
    ActionPayload, ActivityInput, HarvestInput, RemoteInput, SyncAction, SyncBatch,
};

/// Map one queued action to the remote input of the matching kind.
///
/// Photos have no remote delivery path yet and map to `None`.
pub fn to_remote_input(action: &SyncAction) -> Option<RemoteInput> {
    match action.payload() {
        ActionPayload::Activity(payload) => Some(RemoteInput::Activity(ActivityInput {
            plant_id: action.plant_id.clone(),
            device_id: action.device_id.clone(),
            local_id: payload.local_id().clone(),
            kind: payload.kind(),
            note: payload.note().map(str::to_string),
            occurred_at: payload.date(),
        })),
        ActionPayload::Harvest(payload) => Some(RemoteInput::Harvest(HarvestInput {
            plant_id: action.plant_id.clone(),
            device_id: action.device_id.clone(),
            local_id: payload.local_id().clone(),
            quantity: payload.quantity(),
            unit: payload.unit().map(str::to_string),
            note: payload.note().map(str::to_string),
            harvested_at: payload.date(),
        })),
        ActionPayload::Photo(_) => None,
    }
}

/// Partition a queue snapshot by kind, preserving queue order within each kind.
pub fn build_sync_batch<'a>(actions: impl IntoIterator<Item = &'a SyncAction>) -> SyncBatch {
    let mut batch = SyncBatch::default();
    for input in actions.into_iter().filter_map(to_remote_input) {
        match input {
            RemoteInput::Photo(photo) => batch.photos.push(photo),
            RemoteInput::Activity(activity) => batch.activities.push(activity),
            RemoteInput::Harvest(harvest) => batch.harvests.push(harvest),
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityKind, ActivityPayload, HarvestPayload, LocalId, PhotoPayload};
    use pretty_assertions::assert_eq;

    fn activity(plant: &str, local_id: &str) -> SyncAction {
        SyncAction::new(
            plant,
            ActivityPayload::with_local_id(LocalId::parse(local_id).unwrap(), ActivityKind::Watering, 10)
                .with_note(Some("deep soak".to_string())),
        )
        .with_device_id(Some("dev-1".to_string()))
    }

    #[test]
    fn activity_maps_date_to_occurred_at() {
        let action = activity("p1", "loc1");
        let Some(RemoteInput::Activity(input)) = to_remote_input(&action) else {
            panic!("expected an activity input");
        };

        assert_eq!(
            input,
            ActivityInput {
                plant_id: "p1".to_string(),
                device_id: Some("dev-1".to_string()),
                local_id: LocalId::parse("loc1").unwrap(),
                kind: ActivityKind::Watering,
                note: Some("deep soak".to_string()),
                occurred_at: 10,
            }
        );
    }

    #[test]
    fn harvest_maps_date_to_harvested_at() {
        let action = SyncAction::new(
            "p2",
            HarvestPayload::with_local_id(LocalId::parse("h1").unwrap(), 20)
                .with_quantity(Some(0.5), Some("kg".to_string())),
        );
        let Some(RemoteInput::Harvest(input)) = to_remote_input(&action) else {
            panic!("expected a harvest input");
        };
        assert_eq!(input.harvested_at, 20);
        assert_eq!(input.quantity, Some(0.5));
        assert_eq!(input.unit.as_deref(), Some("kg"));
        assert_eq!(input.local_id.as_str(), "h1");
    }

    #[test]
    fn photo_maps_to_nothing() {
        let action = SyncAction::new("p1", PhotoPayload::new("file:///leaf.jpg", 1));
        assert_eq!(to_remote_input(&action), None);

        let batch = build_sync_batch([&action]);
        assert!(batch.photos.is_empty());
        assert!(!batch.has_syncable_items());
    }

    #[test]
    fn every_activity_lands_in_exactly_one_activity_entry() {
        let queue = vec![
            activity("p1", "a1"),
            SyncAction::new("p1", PhotoPayload::new("file:///1.jpg", 1)),
            SyncAction::new("p1", HarvestPayload::with_local_id(LocalId::parse("h1").unwrap(), 2)),
            activity("p2", "a2"),
            SyncAction::new("p3", PhotoPayload::new("file:///2.jpg", 3)),
            activity("p1", "a3"),
            SyncAction::new("p2", HarvestPayload::with_local_id(LocalId::parse("h2").unwrap(), 4)),
        ];

        let batch = build_sync_batch(&queue);

        let activity_ids: Vec<&str> = batch
            .activities
            .iter()
            .map(|input| input.local_id.as_str())
            .collect();
        assert_eq!(activity_ids, vec!["a1", "a2", "a3"]);

        let harvest_ids: Vec<&str> = batch
            .harvests
            .iter()
            .map(|input| input.local_id.as_str())
            .collect();
        assert_eq!(harvest_ids, vec!["h1", "h2"]);

        assert!(batch.photos.is_empty());
        assert_eq!(batch.syncable_len(), 5);
    }
}
