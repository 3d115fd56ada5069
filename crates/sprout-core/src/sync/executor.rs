//! Single-flight sync execution and per-item reconciliation

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use super::{build_sync_batch, RemoteEndpoint, RetryPolicy};
use crate::db::KeyValueStore;
use crate::device::DeviceIdentity;
use crate::error::Result;
use crate::models::{ActionKind, ItemError, ItemKind, LocalId, SyncAction, SyncBatchRequest};
use crate::queue::SyncQueue;
use crate::util::fingerprint;

/// Result of one completed execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// No item or transport errors were reported
    pub ok: bool,
    /// Actions confirmed by the endpoint and removed from the queue
    pub synced_count: usize,
    /// Error strings reported by the endpoint, or 1 for a transport failure
    pub error_count: usize,
    /// Queue length at the start minus `synced_count`
    pub queued_count: usize,
    /// Queued actions skipped because they reached the retry cap
    pub exhausted_count: usize,
}

impl SyncSummary {
    const fn nothing_sent(queued_count: usize, exhausted_count: usize) -> Self {
        Self {
            ok: true,
            synced_count: 0,
            error_count: 0,
            queued_count,
            exhausted_count,
        }
    }

    /// Non-technical status for display.
    pub fn status_message(&self) -> String {
        match self.queued_count {
            0 => "All changes synced".to_string(),
            1 => "1 item not yet synced".to_string(),
            count => format!("{count} items not yet synced"),
        }
    }
}

/// What `execute` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another execution on this executor was in progress; nothing was done
    AlreadyRunning,
    Finished(SyncSummary),
}

/// Loads the queue, submits one batch and prunes confirmed actions.
pub struct SyncExecutor<S, E> {
    queue: SyncQueue<S>,
    identity: DeviceIdentity<S>,
    endpoint: E,
    retry: RetryPolicy,
    record_attempts: bool,
    running: AtomicBool,
}

/// Clears the running flag when an execution ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: KeyValueStore, E: RemoteEndpoint> SyncExecutor<S, E> {
    pub fn new(queue: SyncQueue<S>, identity: DeviceIdentity<S>, endpoint: E) -> Self {
        Self {
            queue,
            identity,
            endpoint,
            retry: RetryPolicy::default(),
            record_attempts: false,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Record `attempts`/`lastError` on actions the endpoint rejects.
    #[must_use]
    pub const fn with_record_attempts(mut self, record_attempts: bool) -> Self {
        self.record_attempts = record_attempts;
        self
    }

    pub const fn queue(&self) -> &SyncQueue<S> {
        &self.queue
    }

    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one sync attempt.
    ///
    /// Transport failures are reported in the summary and leave the queue
    /// untouched. `Err` is returned only when pruning or recording attempts
    /// in local storage fails.
    pub async fn execute(&self) -> Result<SyncOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already running; skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        self.run().await.map(SyncOutcome::Finished)
    }

    async fn run(&self) -> Result<SyncSummary> {
        let actions = self.queue.load().await;
        let original_len = actions.len();
        if actions.is_empty() {
            return Ok(SyncSummary::nothing_sent(0, 0));
        }

        let (exhausted, submitted): (Vec<&SyncAction>, Vec<&SyncAction>) = actions
            .iter()
            .partition(|action| self.retry.is_exhausted(action.attempts()));
        let exhausted_count = exhausted.len();

        let batch = build_sync_batch(submitted.iter().copied());
        if !batch.has_syncable_items() {
            tracing::debug!(
                queued = original_len,
                exhausted = exhausted_count,
                "Nothing syncable in queue"
            );
            return Ok(SyncSummary::nothing_sent(original_len, exhausted_count));
        }

        let device_id = match self.identity.device_id().await {
            Ok(device_id) => Some(device_id),
            Err(error) => {
                tracing::warn!(%error, "Device identity unavailable; sending batch without it");
                None
            }
        };
        let request = SyncBatchRequest {
            device_id,
            activities: batch.activities,
            harvests: batch.harvests,
        };

        let response = match self.endpoint.sync_batch(&request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    %error,
                    device = request.device_id.as_deref().map(fingerprint),
                    queued = original_len,
                    "Sync batch failed; queue left unchanged"
                );
                return Ok(SyncSummary {
                    ok: false,
                    synced_count: 0,
                    error_count: 1,
                    queued_count: original_len,
                    exhausted_count,
                });
            }
        };

        let submitted: Vec<&SyncAction> = submitted
            .into_iter()
            .filter(|action| action.kind() != ActionKind::Photo)
            .collect();
        let failures = Failures::parse(&response.errors, &submitted);
        let (rejected, confirmed): (Vec<&SyncAction>, Vec<&SyncAction>) = submitted
            .into_iter()
            .partition(|action| failures.contains(action));

        // An error we cannot attribute may belong to any submitted item.
        // Re-sending is idempotent, so keep everything queued.
        let synced_ids: Vec<_> = if failures.unattributed > 0 {
            tracing::warn!(
                unattributed = failures.unattributed,
                held_back = confirmed.len(),
                "Sync response had unattributable errors; keeping batch queued"
            );
            Vec::new()
        } else {
            confirmed.iter().map(|action| action.id).collect()
        };
        self.queue.remove_by_ids(&synced_ids).await?;

        if self.record_attempts && !rejected.is_empty() {
            let marks = rejected
                .iter()
                .map(|action| (action.id, failures.message_for(action)))
                .collect();
            self.queue.mark_attempts(marks).await?;
        }

        let summary = SyncSummary {
            ok: response.errors.is_empty(),
            synced_count: synced_ids.len(),
            error_count: response.errors.len(),
            queued_count: original_len - synced_ids.len(),
            exhausted_count,
        };
        tracing::info!(
            synced = summary.synced_count,
            errors = summary.error_count,
            queued = summary.queued_count,
            exhausted = summary.exhausted_count,
            "Sync attempt finished"
        );
        Ok(summary)
    }
}

/// Per-kind sets of rejected localIds, parsed from `<kind>:<localId>:<message>`.
#[derive(Default)]
struct Failures {
    items: Vec<ItemError>,
    activities: HashSet<LocalId>,
    harvests: HashSet<LocalId>,
    /// Error strings that name no item we can identify
    unattributed: usize,
}

impl Failures {
    /// An error is attributed only when it names a submitted item of the same kind.
    fn parse(errors: &[String], submitted: &[&SyncAction]) -> Self {
        let mut failures = Self::default();
        for raw in errors {
            let item = match raw.parse::<ItemError>() {
                Ok(item) if submitted.iter().any(|action| item.names(action)) => item,
                Ok(item) => {
                    tracing::warn!(error = %item, "Sync error names no submitted item");
                    failures.unattributed += 1;
                    continue;
                }
                Err(error) => {
                    tracing::warn!(%error, "Unattributable sync error");
                    failures.unattributed += 1;
                    continue;
                }
            };
            let set = match item.kind {
                ItemKind::Activity => &mut failures.activities,
                ItemKind::Harvest => &mut failures.harvests,
            };
            set.insert(item.local_id.clone());
            failures.items.push(item);
        }
        failures
    }

    fn contains(&self, action: &SyncAction) -> bool {
        match action.kind() {
            ActionKind::Activity => self.activities.contains(action.local_id()),
            ActionKind::Harvest => self.harvests.contains(action.local_id()),
            ActionKind::Photo => false,
        }
    }

    fn message_for(&self, action: &SyncAction) -> Option<String> {
        self.items
            .iter()
            .find(|item| item.names(action))
            .map(|item| item.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, LibSqlIngestStore, MemoryKeyValueStore};
    use crate::ingest::IngestService;
    use crate::models::{
        ActivityKind, ActivityPayload, HarvestPayload, PhotoPayload, SyncBatchResponse,
    };
    use crate::queue::QUEUE_KEY;
    use crate::sync::testing::{Script, ScriptedEndpoint};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn executor<E: RemoteEndpoint>(
        store: &MemoryKeyValueStore,
        endpoint: E,
    ) -> SyncExecutor<MemoryKeyValueStore, E> {
        SyncExecutor::new(
            SyncQueue::new(store.clone()),
            DeviceIdentity::new(store.clone()),
            endpoint,
        )
    }

    fn activity(plant: &str, local_id: &str) -> SyncAction {
        SyncAction::new(
            plant,
            ActivityPayload::with_local_id(LocalId::parse(local_id).unwrap(), ActivityKind::Watering, 1_000),
        )
    }

    fn finished(outcome: SyncOutcome) -> SyncSummary {
        match outcome {
            SyncOutcome::Finished(summary) => summary,
            SyncOutcome::AlreadyRunning => panic!("expected a finished sync"),
        }
    }

    fn local_ids(actions: &[SyncAction]) -> Vec<&str> {
        actions.iter().map(|action| action.local_id().as_str()).collect()
    }

    #[tokio::test]
    async fn test_empty_queue_makes_no_call() {
        let store = MemoryKeyValueStore::new();
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let executor = executor(&store, endpoint.clone());

        let summary = finished(executor.execute().await.unwrap());

        assert_eq!(summary, SyncSummary::nothing_sent(0, 0));
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_photo_only_queue_is_left_alone() {
        let store = MemoryKeyValueStore::new();
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let executor = executor(&store, endpoint.clone());
        executor
            .queue()
            .enqueue_many(vec![
                SyncAction::new("p1", PhotoPayload::new("file:///a.jpg", 1)),
                SyncAction::new("p2", PhotoPayload::new("file:///b.jpg", 2)),
            ])
            .await
            .unwrap();
        let before = store.get(QUEUE_KEY).await.unwrap();

        let summary = finished(executor.execute().await.unwrap());

        assert!(summary.ok);
        assert_eq!(summary.synced_count, 0);
        assert_eq!(summary.queued_count, 2);
        assert_eq!(endpoint.calls(), 0);
        assert_eq!(store.get(QUEUE_KEY).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_queue_byte_identical() {
        let store = MemoryKeyValueStore::new();
        let endpoint = Arc::new(ScriptedEndpoint::new([Script::Fail("connection reset")]));
        let executor = executor(&store, endpoint.clone());
        executor
            .queue()
            .enqueue_many(vec![
                activity("p1", "loc1"),
                SyncAction::new("p1", HarvestPayload::new(2)),
                SyncAction::new("p1", PhotoPayload::new("file:///a.jpg", 3)),
            ])
            .await
            .unwrap();
        let before = store.get(QUEUE_KEY).await.unwrap();

        let summary = finished(executor.execute().await.unwrap());

        assert_eq!(
            summary,
            SyncSummary {
                ok: false,
                synced_count: 0,
                error_count: 1,
                queued_count: 3,
                exhausted_count: 0,
            }
        );
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(store.get(QUEUE_KEY).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_partial_reconciliation_keeps_only_rejected_item() {
        let store = MemoryKeyValueStore::new();
        let endpoint = Arc::new(ScriptedEndpoint::new([Script::Respond(SyncBatchResponse {
            activities_synced: 2,
            harvests_synced: 0,
            errors: vec!["activity:loc2:unauthorized".to_string()],
        })]));
        let executor = executor(&store, endpoint.clone());
        let items = vec![
            activity("p1", "loc1"),
            activity("p2", "loc2"),
            activity("p1", "loc3"),
        ];
        executor.queue().enqueue_many(items.clone()).await.unwrap();

        let summary = finished(executor.execute().await.unwrap());

        assert_eq!(
            summary,
            SyncSummary {
                ok: false,
                synced_count: 2,
                error_count: 1,
                queued_count: 1,
                exhausted_count: 0,
            }
        );
        assert_eq!(executor.queue().load().await, vec![items[1].clone()]);

        let request = endpoint.last_request().unwrap();
        assert_eq!(request.activities.len(), 3);
        assert!(request.device_id.is_some());
    }

    #[tokio::test]
    async fn test_error_kind_scopes_the_local_id() {
        let store = MemoryKeyValueStore::new();
        let endpoint = Arc::new(ScriptedEndpoint::new([Script::Respond(SyncBatchResponse {
            activities_synced: 1,
            harvests_synced: 0,
            errors: vec!["harvest:shared:db: constraint failed".to_string()],
        })]));
        let executor = executor(&store, endpoint);
        executor
            .queue()
            .enqueue_many(vec![
                activity("p1", "shared"),
                SyncAction::new("p1", HarvestPayload::with_local_id(LocalId::parse("shared").unwrap(), 2)),
            ])
            .await
            .unwrap();

        let summary = finished(executor.execute().await.unwrap());

        assert_eq!(summary.synced_count, 1);
        let remaining = executor.queue().load().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind(), ActionKind::Harvest);
    }

    #[tokio::test]
    async fn test_unattributable_errors_keep_the_whole_batch() {
        let store = MemoryKeyValueStore::new();
        let endpoint = Arc::new(ScriptedEndpoint::new([
            Script::Respond(SyncBatchResponse {
                activities_synced: 1,
                harvests_synced: 0,
                errors: vec![
                    "activity:loc2:unauthorized".to_string(),
                    "activity:a:b:unauthorized".to_string(),
                ],
            }),
            Script::Respond(SyncBatchResponse {
                activities_synced: 2,
                harvests_synced: 0,
                errors: vec!["photo:loc1:nope".to_string()],
            }),
            Script::Respond(SyncBatchResponse {
                activities_synced: 1,
                harvests_synced: 0,
                errors: vec!["internal error".to_string(), "activity::boom".to_string()],
            }),
        ]));
        let executor = executor(&store, endpoint.clone());
        let items = vec![activity("p1", "loc1"), activity("p2", "loc2")];
        executor.queue().enqueue_many(items.clone()).await.unwrap();

        for expected_errors in [2, 1, 2] {
            let summary = finished(executor.execute().await.unwrap());
            assert_eq!(
                summary,
                SyncSummary {
                    ok: false,
                    synced_count: 0,
                    error_count: expected_errors,
                    queued_count: 2,
                    exhausted_count: 0,
                }
            );
            assert_eq!(executor.queue().load().await, items);
        }
        assert_eq!(endpoint.calls(), 3);

        // Once the response is fully attributable, confirmed items are pruned
        let summary = finished(executor.execute().await.unwrap());
        assert!(summary.ok);
        assert!(executor.queue().load().await.is_empty());
    }

    #[tokio::test]
    async fn test_photos_survive_a_successful_batch() {
        let store = MemoryKeyValueStore::new();
        let executor = executor(&store, Arc::new(ScriptedEndpoint::default()));
        let photo = SyncAction::new("p1", PhotoPayload::new("file:///a.jpg", 1));
        executor
            .queue()
            .enqueue_many(vec![activity("p1", "loc1"), photo.clone()])
            .await
            .unwrap();

        let summary = finished(executor.execute().await.unwrap());

        assert!(summary.ok);
        assert_eq!(summary.synced_count, 1);
        assert_eq!(summary.queued_count, 1);
        assert_eq!(executor.queue().load().await, vec![photo]);
    }

    #[tokio::test]
    async fn test_attempts_untouched_without_recording() {
        let store = MemoryKeyValueStore::new();
        let endpoint = Arc::new(ScriptedEndpoint::new([Script::Respond(SyncBatchResponse {
            errors: vec!["activity:loc1:unauthorized".to_string()],
            ..SyncBatchResponse::default()
        })]));
        let executor = executor(&store, endpoint);
        executor.queue().enqueue(activity("p9", "loc1")).await.unwrap();

        finished(executor.execute().await.unwrap());

        let remaining = executor.queue().load().await;
        assert_eq!(remaining[0].attempts(), 0);
        assert_eq!(remaining[0].last_error(), None);
    }

    #[tokio::test]
    async fn test_recorded_attempts_exhaust_an_action() {
        let store = MemoryKeyValueStore::new();
        let rejection = SyncBatchResponse {
            activities_synced: 1,
            errors: vec!["activity:loc1:unauthorized".to_string()],
            ..SyncBatchResponse::default()
        };
        let endpoint = Arc::new(ScriptedEndpoint::new([Script::Respond(rejection)]));
        let executor = executor(&store, endpoint.clone())
            .with_record_attempts(true)
            .with_retry_policy(RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            });
        executor
            .queue()
            .enqueue_many(vec![activity("p9", "loc1"), activity("p1", "loc2")])
            .await
            .unwrap();

        let first = finished(executor.execute().await.unwrap());
        assert_eq!(first.synced_count, 1);
        let remaining = executor.queue().load().await;
        assert_eq!(local_ids(&remaining), vec!["loc1"]);
        assert_eq!(remaining[0].attempts(), 1);
        assert_eq!(remaining[0].last_error(), Some("unauthorized"));

        let second = finished(executor.execute().await.unwrap());
        assert_eq!(
            second,
            SyncSummary {
                ok: true,
                synced_count: 0,
                error_count: 0,
                queued_count: 1,
                exhausted_count: 1,
            }
        );
        assert_eq!(endpoint.calls(), 1);

        executor
            .queue()
            .retry_exhausted(executor.retry_policy(), &[])
            .await
            .unwrap();
        finished(executor.execute().await.unwrap());
        assert_eq!(endpoint.calls(), 2);
        assert!(executor.queue().load().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_execute_while_running_is_skipped() {
        let store = MemoryKeyValueStore::new();
        let endpoint = Arc::new(ScriptedEndpoint::gated());
        let executor = executor(&store, endpoint.clone());
        executor.queue().enqueue(activity("p1", "loc1")).await.unwrap();

        let first = executor.execute();
        let second = async {
            endpoint.wait_until_entered().await;
            assert!(executor.is_running());
            let outcome = executor.execute().await.unwrap();
            endpoint.release();
            outcome
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(second, SyncOutcome::AlreadyRunning);
        assert_eq!(finished(first.unwrap()).synced_count, 1);
        assert_eq!(endpoint.calls(), 1);
        assert!(!executor.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_end_to_end_against_ingest_service() {
        let server_db = Arc::new(Database::open_in_memory().await.unwrap());
        let service = Arc::new(IngestService::new(LibSqlIngestStore::new(server_db)));

        let client_db = Arc::new(Database::open_in_memory().await.unwrap());
        let store = crate::db::LibSqlKeyValueStore::new(client_db);
        let executor = SyncExecutor::new(
            SyncQueue::new(store.clone()),
            DeviceIdentity::new(store.clone()),
            service.clone(),
        );

        let device_id = DeviceIdentity::new(store).device_id().await.unwrap();
        service.register_device(&device_id, "alice").await.unwrap();
        service.register_plant("p1", "alice").await.unwrap();
        service.register_plant("p2", "bob").await.unwrap();

        executor.queue().enqueue(activity("p1", "loc1")).await.unwrap();
        let summary = finished(executor.execute().await.unwrap());
        assert_eq!(
            summary,
            SyncSummary {
                ok: true,
                synced_count: 1,
                error_count: 0,
                queued_count: 0,
                exhausted_count: 0,
            }
        );
        assert!(executor.queue().load().await.is_empty());
        assert_eq!(summary.status_message(), "All changes synced");

        executor.queue().enqueue(activity("p2", "loc2")).await.unwrap();
        let summary = finished(executor.execute().await.unwrap());
        assert_eq!(
            summary,
            SyncSummary {
                ok: false,
                synced_count: 0,
                error_count: 1,
                queued_count: 1,
                exhausted_count: 0,
            }
        );
        assert_eq!(local_ids(&executor.queue().load().await), vec!["loc2"]);
        assert_eq!(summary.status_message(), "1 item not yet synced");

        // Re-sending an already ingested record is reported as synced
        executor.queue().enqueue(activity("p1", "loc1")).await.unwrap();
        let summary = finished(executor.execute().await.unwrap());
        assert_eq!(summary.synced_count, 1);
        assert_eq!(
            service
                .store()
                .count_records(ItemKind::Activity, "p1")
                .await
                .unwrap(),
            1
        );
    }

    #[test]
    fn status_message_pluralizes() {
        let summary = SyncSummary {
            queued_count: 3,
            ..SyncSummary::default()
        };
        assert_eq!(summary.status_message(), "3 items not yet synced");
    }
}
