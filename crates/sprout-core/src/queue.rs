//! Durable local queue of pending actions
//!
//! The whole queue is one JSON array stored under one key. Every mutation is a
//! read-modify-write of that array, serialized behind a per-queue lock shared
//! by all clones, so concurrent callers cannot lose each other's updates.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::KeyValueStore;
use crate::error::{Error, Result};
use crate::models::{ActionId, SyncAction};
use crate::sync::RetryPolicy;

/// Storage key of the queue blob
pub const QUEUE_KEY: &str = "sprout.sync.queue";

/// Ordered, persisted collection of not-yet-confirmed actions.
#[derive(Clone)]
pub struct SyncQueue<S> {
    store: S,
    key: String,
    write_lock: Arc<Mutex<()>>,
}

impl<S: KeyValueStore> SyncQueue<S> {
    pub fn new(store: S) -> Self {
        Self::with_key(store, QUEUE_KEY)
    }

    /// Queue stored under a custom key
    pub fn with_key(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current queue contents, in insertion order.
    ///
    /// Never fails: storage errors yield an empty queue. A blob that cannot be
    /// parsed is moved aside under a `.corrupt-<ms>` key before the empty
    /// queue is returned.
    pub async fn load(&self) -> Vec<SyncAction> {
        let _guard = self.write_lock.lock().await;
        match self.read().await {
            Ok(actions) => actions,
            Err(error) => {
                tracing::warn!(%error, "Failed to read sync queue; treating as empty");
                Vec::new()
            }
        }
    }

    /// Overwrite the persisted queue with `actions` in one write.
    pub async fn save(&self, actions: &[SyncAction]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(actions).await
    }

    /// Append one action.
    pub async fn enqueue(&self, action: SyncAction) -> Result<()> {
        self.enqueue_many(vec![action]).await
    }

    /// Append actions in order. Rejects the whole call if any action's id, or
    /// its localId within the same plant and kind, is already queued.
    pub async fn enqueue_many(&self, actions: Vec<SyncAction>) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut queue = self.read().await?;

        let mut ids: HashSet<ActionId> = queue.iter().map(|action| action.id).collect();
        let mut keys: HashSet<_> = queue.iter().map(dedupe_key).collect();
        for action in &actions {
            if !ids.insert(action.id) || !keys.insert(dedupe_key(action)) {
                return Err(Error::DuplicateAction(action.id.to_string()));
            }
        }

        let added = actions.len();
        queue.extend(actions);
        self.write(&queue).await?;
        tracing::debug!(added, queued = queue.len(), "Enqueued sync actions");
        Ok(())
    }

    /// Remove confirmed actions. Returns how many were removed; no write
    /// happens when nothing matches.
    pub async fn remove_by_ids(&self, ids: &[ActionId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut queue = self.read().await?;
        let before = queue.len();
        let ids: HashSet<&ActionId> = ids.iter().collect();
        queue.retain(|action| !ids.contains(&action.id));

        let removed = before - queue.len();
        if removed > 0 {
            self.write(&queue).await?;
        }
        Ok(removed)
    }

    /// Record one failed delivery attempt. Returns `false` if the id is not queued.
    pub async fn mark_attempt(&self, id: ActionId, error: Option<String>) -> Result<bool> {
        Ok(self.mark_attempts(vec![(id, error)]).await? > 0)
    }

    /// Record failed attempts for several actions in one write.
    pub async fn mark_attempts(&self, failures: Vec<(ActionId, Option<String>)>) -> Result<usize> {
        if failures.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut queue = self.read().await?;
        let mut marked = 0;
        for (id, error) in failures {
            if let Some(action) = queue.iter_mut().find(|action| action.id == id) {
                action.record_attempt(error);
                marked += 1;
            }
        }

        if marked > 0 {
            self.write(&queue).await?;
        }
        Ok(marked)
    }

    /// Actions that reached the retry cap and are no longer submitted.
    pub async fn exhausted(&self, policy: &RetryPolicy) -> Vec<SyncAction> {
        self.load()
            .await
            .into_iter()
            .filter(|action| policy.is_exhausted(action.attempts()))
            .collect()
    }

    /// Give exhausted actions a fresh start: each is replaced by a copy with
    /// its attempt history cleared, appended at the end of the queue. A
    /// non-empty `ids` narrows the reset to those actions. Actions still
    /// under `policy`'s cap are never touched.
    pub async fn retry_exhausted(&self, policy: &RetryPolicy, ids: &[ActionId]) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let queue = self.read().await?;
        let selected: HashSet<&ActionId> = ids.iter().collect();

        let (reset, mut kept): (Vec<_>, Vec<_>) = queue.into_iter().partition(|action| {
            policy.is_exhausted(action.attempts())
                && (selected.is_empty() || selected.contains(&action.id))
        });
        if reset.is_empty() {
            return Ok(0);
        }

        let count = reset.len();
        kept.extend(reset.iter().map(SyncAction::cleared_attempts));
        self.write(&kept).await?;
        tracing::info!(count, "Reset attempts for exhausted sync actions");
        Ok(count)
    }

    async fn read(&self) -> Result<Vec<SyncAction>> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(actions) => Ok(actions),
            Err(error) => {
                let quarantine_key = format!("{}.corrupt-{}", self.key, crate::util::unix_millis_now());
                tracing::error!(%error, %quarantine_key, "Sync queue is unparsable; moving it aside");
                self.store.set(&quarantine_key, &raw).await?;
                self.store.remove(&self.key).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn write(&self, actions: &[SyncAction]) -> Result<()> {
        let raw = serde_json::to_string(actions)?;
        self.store.set(&self.key, &raw).await
    }
}

fn dedupe_key(action: &SyncAction) -> (String, crate::models::ActionKind, String) {
    (
        action.plant_id.clone(),
        action.kind(),
        action.local_id().as_str().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, LibSqlKeyValueStore, MemoryKeyValueStore};
    use crate::models::{ActivityKind, ActivityPayload, HarvestPayload, LocalId, PhotoPayload};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn watering(plant: &str, local_id: &str) -> SyncAction {
        SyncAction::new(
            plant,
            ActivityPayload::with_local_id(LocalId::parse(local_id).unwrap(), ActivityKind::Watering, 1),
        )
    }

    fn ids(actions: &[SyncAction]) -> Vec<ActionId> {
        actions.iter().map(|action| action.id).collect()
    }

    #[tokio::test]
    async fn test_load_missing_queue_is_empty() {
        let queue = SyncQueue::new(MemoryKeyValueStore::new());
        assert!(queue.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let queue = SyncQueue::new(MemoryKeyValueStore::new());
        let first = watering("p1", "loc1");
        let second = SyncAction::new("p1", HarvestPayload::new(2));
        let third = SyncAction::new("p2", PhotoPayload::new("file:///a.jpg", 3));

        queue.enqueue(first.clone()).await.unwrap();
        queue
            .enqueue_many(vec![second.clone(), third.clone()])
            .await
            .unwrap();

        assert_eq!(queue.load().await, vec![first, second, third]);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_duplicate_id_and_local_id() {
        let queue = SyncQueue::new(MemoryKeyValueStore::new());
        let action = watering("p1", "loc1");
        queue.enqueue(action.clone()).await.unwrap();

        assert!(matches!(
            queue.enqueue(action).await,
            Err(Error::DuplicateAction(_))
        ));
        assert!(matches!(
            queue.enqueue(watering("p1", "loc1")).await,
            Err(Error::DuplicateAction(_))
        ));

        // Same localId on another plant is a different record
        queue.enqueue(watering("p2", "loc1")).await.unwrap();
        assert_eq!(queue.load().await.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_by_ids_keeps_others() {
        let queue = SyncQueue::new(MemoryKeyValueStore::new());
        let actions = vec![watering("p1", "a"), watering("p1", "b"), watering("p1", "c")];
        queue.enqueue_many(actions.clone()).await.unwrap();

        let removed = queue
            .remove_by_ids(&[actions[0].id, actions[2].id, ActionId::new()])
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(queue.load().await, vec![actions[1].clone()]);
    }

    #[tokio::test]
    async fn test_remove_by_empty_ids_does_not_write() {
        let store = MemoryKeyValueStore::new();
        let queue = SyncQueue::new(store.clone());
        assert_eq!(queue.remove_by_ids(&[]).await.unwrap(), 0);
        assert_eq!(store.get(QUEUE_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mark_attempt_increments_and_sets_error() {
        let queue = SyncQueue::new(MemoryKeyValueStore::new());
        let action = watering("p1", "loc1");
        queue.enqueue(action.clone()).await.unwrap();

        assert!(queue
            .mark_attempt(action.id, Some("unauthorized".to_string()))
            .await
            .unwrap());
        assert!(queue.mark_attempt(action.id, None).await.unwrap());
        assert!(!queue.mark_attempt(ActionId::new(), None).await.unwrap());

        let loaded = queue.load().await;
        assert_eq!(loaded[0].attempts(), 2);
        assert_eq!(loaded[0].last_error(), None);
        assert_eq!(loaded[0].local_id(), action.local_id());
    }

    #[tokio::test]
    async fn test_retry_exhausted_appends_cleared_copy() {
        let queue = SyncQueue::new(MemoryKeyValueStore::new());
        let stuck = watering("p1", "stuck");
        let fresh = watering("p1", "fresh");
        queue
            .enqueue_many(vec![stuck.clone(), fresh.clone()])
            .await
            .unwrap();
        queue
            .mark_attempts(vec![
                (stuck.id, Some("unauthorized".to_string())),
                (stuck.id, Some("unauthorized".to_string())),
            ])
            .await
            .unwrap();

        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        assert_eq!(ids(&queue.exhausted(&policy).await), vec![stuck.id]);

        assert_eq!(queue.retry_exhausted(&policy, &[stuck.id]).await.unwrap(), 1);
        let loaded = queue.load().await;
        assert_eq!(ids(&loaded), vec![fresh.id, stuck.id]);
        assert_eq!(loaded[1].attempts(), 0);
        assert_eq!(loaded[1].local_id().as_str(), "stuck");
        assert!(queue.exhausted(&policy).await.is_empty());

        assert_eq!(queue.retry_exhausted(&policy, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_exhausted_leaves_actions_under_the_cap() {
        let queue = SyncQueue::new(MemoryKeyValueStore::new());
        let stuck = watering("p1", "stuck");
        let retrying = watering("p1", "retrying");
        queue
            .enqueue_many(vec![stuck.clone(), retrying.clone()])
            .await
            .unwrap();
        queue
            .mark_attempts(vec![
                (stuck.id, Some("unauthorized".to_string())),
                (stuck.id, Some("unauthorized".to_string())),
                (retrying.id, Some("timeout".to_string())),
            ])
            .await
            .unwrap();
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };

        assert_eq!(queue.retry_exhausted(&policy, &[retrying.id]).await.unwrap(), 0);
        assert_eq!(queue.retry_exhausted(&policy, &[]).await.unwrap(), 1);

        let loaded = queue.load().await;
        assert_eq!(ids(&loaded), vec![retrying.id, stuck.id]);
        assert_eq!(loaded[0].attempts(), 1);
        assert_eq!(loaded[0].last_error(), Some("timeout"));
        assert_eq!(loaded[1].attempts(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_quarantined() {
        let store = MemoryKeyValueStore::new();
        store.set(QUEUE_KEY, "{not json").await.unwrap();
        let queue = SyncQueue::new(store.clone());

        assert!(queue.load().await.is_empty());
        assert_eq!(store.get(QUEUE_KEY).await.unwrap(), None);

        let quarantined: Vec<String> = store
            .keys()
            .await
            .into_iter()
            .filter(|key| key.starts_with("sprout.sync.queue.corrupt-"))
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(
            store.get(&quarantined[0]).await.unwrap().as_deref(),
            Some("{not json")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_loses_nothing() {
        let queue = SyncQueue::new(MemoryKeyValueStore::new());
        let mut tasks = tokio::task::JoinSet::new();
        for index in 0..32 {
            let queue = queue.clone();
            tasks.spawn(async move {
                queue
                    .enqueue(watering("p1", &format!("loc{index}")))
                    .await
                    .unwrap();
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        assert_eq!(queue.load().await.len(), 32);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queue_survives_restart() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("client.db");
        let action = watering("p1", "loc1");

        {
            let db = Arc::new(Database::open(&path).await.unwrap());
            let queue = SyncQueue::new(LibSqlKeyValueStore::new(db));
            queue.enqueue(action.clone()).await.unwrap();
        }

        let db = Arc::new(Database::open(&path).await.unwrap());
        let queue = SyncQueue::new(LibSqlKeyValueStore::new(db));
        assert_eq!(queue.load().await, vec![action]);
    }
}
