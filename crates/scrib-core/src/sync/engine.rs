//! Push/pull orchestration over the durable sync queue

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::db::{
    Database, NewConflict, RecordStore, SqliteConflictStore, SqliteRecordStore, SqliteSyncQueue,
    SqliteSyncState, SyncStatusCounts,
};
use crate::error::{Error, Result};
use crate::models::{RecordId, ResolutionStrategy, SyncConflict, SyncOperation, SyncRecord};
use crate::sync::remote::{PushOutcome, PushRequest, RemoteSync};
use crate::sync::{backoff, resolver};

/// Callback invoked after each sync cycle with the current queue counts
pub type SyncListener = Box<dyn Fn(&SyncStatusCounts) + Send>;

/// Outcome of one sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Queue entries pushed and accepted by the remote
    pub pushed: usize,
    /// Remote changes applied to the local store
    pub pulled: usize,
}

/// Drives the sync queue against a remote collaborator.
///
/// Push-then-pull per cycle: local mutations replay oldest-first, then the
/// remote change stream is applied from the persisted checkpoint. The
/// database lock is never held across a network call.
pub struct SyncEngine<R: RemoteSync> {
    db: Arc<Mutex<Database>>,
    remote: R,
    config: EngineConfig,
    listeners: Arc<std::sync::Mutex<Vec<SyncListener>>>,
}

impl<R: RemoteSync> SyncEngine<R> {
    /// Create an engine over a shared database handle
    pub fn new(db: Arc<Mutex<Database>>, remote: R, config: EngineConfig) -> Self {
        Self {
            db,
            remote,
            config,
            listeners: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Register a listener notified with queue counts after each cycle
    pub fn subscribe(&self, listener: SyncListener) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }

    /// Run one full cycle: push due local mutations, then pull remote
    /// changes.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let pushed = self.push_pending().await?;
        let pulled = self.pull().await?;

        let counts = self.status_counts().await?;
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                listener(&counts);
            }
        }
        Ok(SyncReport { pushed, pulled })
    }

    /// Sync forever on the configured interval.
    ///
    /// Cycle errors are logged and the loop keeps going; stop it by
    /// dropping the task driving this future.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.sync_once().await {
                Ok(report) => {
                    tracing::debug!(pushed = report.pushed, pulled = report.pulled, "Sync cycle");
                }
                Err(err) => tracing::warn!("Sync cycle failed: {err}"),
            }
        }
    }

    /// Push every due queue entry, oldest first. Returns how many the
    /// remote accepted.
    pub async fn push_pending(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let due = {
            let db = self.db.lock().await;
            SqliteSyncQueue::new(db.connection()).due(now)?
        };

        let mut pushed = 0;
        for entry in due {
            let claimed = {
                let db = self.db.lock().await;
                SqliteSyncQueue::new(db.connection()).claim(entry.id, now)?
            };
            let Some(claimed) = claimed else {
                continue;
            };

            let request = PushRequest {
                table_name: claimed.table_name.clone(),
                record_id: claimed.record_id.clone(),
                operation: claimed.operation,
                payload: claimed.local_data.clone(),
                expected_version: claimed.base_version,
            };
            let outcome = self.remote.push(&request).await;

            if self.apply_push_outcome(&claimed, outcome).await? {
                pushed += 1;
            }
        }
        Ok(pushed)
    }

    async fn apply_push_outcome(
        &self,
        claimed: &SyncRecord,
        outcome: std::result::Result<PushOutcome, crate::error::RemoteError>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let db = self.db.lock().await;
        let queue = SqliteSyncQueue::new(db.connection());
        let store = SqliteRecordStore::new(db.connection());
        let record_id = RecordId::from(claimed.record_id.as_str());

        match outcome {
            Ok(PushOutcome::Applied { new_version }) => {
                let completed = queue.complete(claimed.id, claimed.updated_at, now)?;
                if claimed.operation != SyncOperation::Delete {
                    store.mark_synced(
                        &claimed.table_name,
                        &record_id,
                        new_version,
                        claimed.updated_at,
                    )?;
                }
                tracing::debug!(
                    table = %claimed.table_name,
                    record = %claimed.record_id,
                    new_version,
                    completed,
                    "Push accepted"
                );
                Ok(true)
            }
            Ok(PushOutcome::VersionMismatch {
                remote_version,
                remote_payload,
                remote_updated_at,
            }) => {
                let fields = resolver::conflict_fields(&claimed.local_data, &remote_payload);
                if fields.is_empty() {
                    // Both sides converged on the same payload; nothing to
                    // resolve, just adopt the remote version stamp
                    if queue.complete(claimed.id, claimed.updated_at, now)? {
                        store.mark_synced(
                            &claimed.table_name,
                            &record_id,
                            remote_version,
                            claimed.updated_at,
                        )?;
                    }
                    return Ok(true);
                }

                queue.mark_conflict(claimed.id, &remote_payload, now)?;
                SqliteConflictStore::new(db.connection()).upsert_pending(
                    &NewConflict {
                        sync_record_id: Some(claimed.id),
                        table_name: claimed.table_name.clone(),
                        record_id: claimed.record_id.clone(),
                        local_data: claimed.local_data.clone(),
                        remote_data: remote_payload,
                        conflict_fields: fields,
                        local_updated_at: claimed.updated_at,
                        remote_updated_at,
                        remote_version,
                    },
                    now,
                )?;
                tracing::warn!(
                    table = %claimed.table_name,
                    record = %claimed.record_id,
                    remote_version,
                    "Push rejected as stale; conflict recorded"
                );
                Ok(false)
            }
            Err(err) if err.is_retryable() => {
                let wait = backoff::delay(
                    claimed.retry_count + 1,
                    self.config.backoff_base,
                    self.config.backoff_cap,
                );
                let backoff_ms = i64::try_from(wait.as_millis()).unwrap_or(i64::MAX);
                let status =
                    queue.mark_transient_failure(claimed.id, &err.to_string(), backoff_ms, now)?;
                tracing::warn!(
                    table = %claimed.table_name,
                    record = %claimed.record_id,
                    status = %status,
                    "Push failed transiently: {err}"
                );
                Ok(false)
            }
            Err(err) => {
                queue.mark_permanent_failure(claimed.id, &err.to_string(), now)?;
                tracing::error!(
                    table = %claimed.table_name,
                    record = %claimed.record_id,
                    "Push failed permanently: {err}"
                );
                Ok(false)
            }
        }
    }

    /// Pull remote changes since the persisted checkpoint and apply them.
    /// Returns how many changes touched the local store.
    pub async fn pull(&self) -> Result<usize> {
        let since = {
            let db = self.db.lock().await;
            SqliteSyncState::new(db.connection()).checkpoint()?
        };
        let batch = self.remote.pull(since.as_deref()).await?;

        let db = self.db.lock().await;
        let queue = SqliteSyncQueue::new(db.connection());
        let store = SqliteRecordStore::new(db.connection());
        let conflicts = SqliteConflictStore::new(db.connection());
        let now = chrono::Utc::now().timestamp_millis();

        let mut applied = 0;
        for change in &batch.changes {
            let deleted = change.deleted_at.is_some();
            let remote_snapshot = if deleted {
                Value::Null
            } else {
                change.payload.clone()
            };
            let record_id = RecordId::from(change.record_id.as_str());

            if let Some(entry) = queue.live_entry(&change.table_name, &change.record_id)? {
                let fields = resolver::conflict_fields(&entry.local_data, &remote_snapshot);
                if fields.is_empty() {
                    // Local queue holds the same payload the remote already
                    // has; drop the entry and adopt the remote stamp
                    queue.complete_resolved(entry.id)?;
                    if store.apply_remote(
                        &change.table_name,
                        &record_id,
                        &change.payload,
                        change.version,
                        deleted,
                    )? {
                        applied += 1;
                    }
                } else {
                    queue.mark_conflict(entry.id, &remote_snapshot, now)?;
                    conflicts.upsert_pending(
                        &NewConflict {
                            sync_record_id: Some(entry.id),
                            table_name: change.table_name.clone(),
                            record_id: change.record_id.clone(),
                            local_data: entry.local_data,
                            remote_data: remote_snapshot,
                            conflict_fields: fields,
                            local_updated_at: entry.updated_at,
                            remote_updated_at: change.updated_at,
                            remote_version: change.version,
                        },
                        now,
                    )?;
                    tracing::warn!(
                        table = %change.table_name,
                        record = %change.record_id,
                        "Remote change collides with dirty local record; conflict recorded"
                    );
                }
            } else if store.apply_remote(
                &change.table_name,
                &record_id,
                &change.payload,
                change.version,
                deleted,
            )? {
                applied += 1;
            }
        }

        SqliteSyncState::new(db.connection()).set_checkpoint(&batch.checkpoint)?;
        Ok(applied)
    }

    /// Resolve a pending conflict with the given strategy and return the
    /// resolved payload.
    ///
    /// `manual_payload` is required for [`ResolutionStrategy::Manual`].
    /// Local/merge/manual resolutions requeue the entry for another push
    /// with the remote's version as the new base; a remote resolution
    /// overwrites the local store and needs no push.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        strategy: ResolutionStrategy,
        manual_payload: Option<Value>,
    ) -> Result<Value> {
        let now = chrono::Utc::now().timestamp_millis();
        let db = self.db.lock().await;
        let queue = SqliteSyncQueue::new(db.connection());
        let store = SqliteRecordStore::new(db.connection());
        let conflicts = SqliteConflictStore::new(db.connection());

        let conflict = conflicts
            .get(conflict_id)?
            .ok_or_else(|| Error::not_found("sync_conflicts", conflict_id))?;
        let resolved = resolver::resolve(&conflict, strategy, manual_payload)?;
        let record_id = RecordId::from(conflict.record_id.as_str());

        if strategy == ResolutionStrategy::Remote {
            store.apply_remote(
                &conflict.table_name,
                &record_id,
                &conflict.remote_data,
                conflict.remote_version,
                conflict.remote_data.is_null(),
            )?;
            if let Some(sync_record_id) = conflict.sync_record_id {
                queue.complete_resolved(sync_record_id)?;
            }
        } else {
            let entry = match conflict.sync_record_id {
                Some(id) => queue.get(id)?,
                None => queue.live_entry(&conflict.table_name, &conflict.record_id)?,
            };

            if resolved.is_null() {
                // Local deletion wins; replay the tombstone against the
                // remote's current version
                if let Some(entry) = entry {
                    queue.resolve_to_pending(
                        entry.id,
                        &resolved,
                        conflict.remote_version,
                        strategy,
                        now,
                    )?;
                }
            } else {
                // A delete entry cannot carry a payload; retire it and let
                // the mutation path enqueue a fresh one
                if let Some(entry) = &entry {
                    if entry.operation == SyncOperation::Delete {
                        queue.complete_resolved(entry.id)?;
                    }
                }
                store.put(&conflict.table_name, &record_id, resolved.clone())?;
                if let Some(live) =
                    queue.live_entry(&conflict.table_name, &conflict.record_id)?
                {
                    queue.resolve_to_pending(
                        live.id,
                        &resolved,
                        conflict.remote_version,
                        strategy,
                        now,
                    )?;
                }
            }
        }

        conflicts.mark_resolved(conflict_id, strategy, &resolved, now)?;
        tracing::info!(
            table = %conflict.table_name,
            record = %conflict.record_id,
            strategy = %strategy,
            "Conflict resolved"
        );
        Ok(resolved)
    }

    /// Unresolved conflicts, oldest first
    pub async fn list_conflicts(&self) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictStore::new(db.connection()).list_pending()
    }

    /// Queue entries whose retry budget is spent
    pub async fn list_failed(&self) -> Result<Vec<SyncRecord>> {
        let db = self.db.lock().await;
        SqliteSyncQueue::new(db.connection()).list_failed()
    }

    /// Give a terminally failed entry a fresh retry budget
    pub async fn requeue_failed(&self, sync_record_id: i64) -> Result<()> {
        let db = self.db.lock().await;
        let now = chrono::Utc::now().timestamp_millis();
        SqliteSyncQueue::new(db.connection()).requeue_failed(sync_record_id, now)
    }

    /// Current queue counts by status
    pub async fn status_counts(&self) -> Result<SyncStatusCounts> {
        let db = self.db.lock().await;
        SqliteSyncQueue::new(db.connection()).counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::sync::remote::{PullBatch, RemoteChange};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    type PushResult = std::result::Result<PushOutcome, RemoteError>;

    #[derive(Default)]
    struct MockRemote {
        push_outcomes: StdMutex<VecDeque<PushResult>>,
        pushes: StdMutex<Vec<PushRequest>>,
        pull_batches: StdMutex<VecDeque<PullBatch>>,
        pulls: StdMutex<Vec<Option<String>>>,
    }

    impl MockRemote {
        fn queue_push(&self, outcome: PushResult) {
            self.push_outcomes.lock().unwrap().push_back(outcome);
        }

        fn queue_pull(&self, batch: PullBatch) {
            self.pull_batches.lock().unwrap().push_back(batch);
        }

        fn pushes(&self) -> Vec<PushRequest> {
            self.pushes.lock().unwrap().clone()
        }
    }

    impl RemoteSync for Arc<MockRemote> {
        async fn push(&self, request: &PushRequest) -> PushResult {
            self.pushes.lock().unwrap().push(request.clone());
            self.push_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PushOutcome::Applied { new_version: 1 }))
        }

        async fn pull(
            &self,
            since: Option<&str>,
        ) -> std::result::Result<PullBatch, RemoteError> {
            self.pulls.lock().unwrap().push(since.map(String::from));
            Ok(self
                .pull_batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| PullBatch {
                    changes: Vec::new(),
                    checkpoint: since.unwrap_or("cp-0").to_string(),
                }))
        }
    }

    fn setup() -> (
        SyncEngine<Arc<MockRemote>>,
        Arc<Mutex<Database>>,
        Arc<MockRemote>,
    ) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let remote = Arc::new(MockRemote::default());
        let engine = SyncEngine::new(Arc::clone(&db), Arc::clone(&remote), EngineConfig::default());
        (engine, db, remote)
    }

    async fn put(db: &Arc<Mutex<Database>>, id: &str, payload: Value) {
        let db = db.lock().await;
        SqliteRecordStore::new(db.connection())
            .put("content_item", &RecordId::from(id), payload)
            .unwrap();
    }

    async fn record(db: &Arc<Mutex<Database>>, id: &str) -> Option<crate::models::Record> {
        let db = db.lock().await;
        SqliteRecordStore::new(db.connection())
            .get("content_item", &RecordId::from(id))
            .unwrap()
    }

    fn change(id: &str, payload: Value, version: i64) -> RemoteChange {
        RemoteChange {
            table_name: "content_item".to_string(),
            record_id: id.to_string(),
            payload,
            version,
            updated_at: 1_000,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn accepted_push_clears_queue_and_dirty_flag() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"title": "Draft"})).await;
        remote.queue_push(Ok(PushOutcome::Applied { new_version: 4 }));

        let report = engine.sync_once().await.unwrap();

        assert_eq!(report.pushed, 1);
        assert!(engine.status_counts().await.unwrap().is_idle());
        let record = record(&db, "r1").await.unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.remote_version, Some(4));

        let pushes = remote.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].operation, SyncOperation::Create);
        assert_eq!(pushes[0].expected_version, None);
        assert_eq!(pushes[0].payload, json!({"title": "Draft"}));
    }

    #[tokio::test]
    async fn transient_failure_backs_off_before_retrying() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"v": 1})).await;
        remote.queue_push(Err(RemoteError::Transient("timeout".to_string())));

        let report = engine.sync_once().await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(engine.status_counts().await.unwrap().pending, 1);

        // Second cycle runs inside the backoff window; no push happens
        engine.sync_once().await.unwrap();
        assert_eq!(remote.pushes().len(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_goes_terminal_and_can_be_requeued() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"v": 1})).await;
        remote.queue_push(Err(RemoteError::Validation("bad payload".to_string())));

        engine.sync_once().await.unwrap();
        assert_eq!(engine.status_counts().await.unwrap().failed, 1);

        let failed = engine.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("Remote validation error: bad payload"));

        engine.requeue_failed(failed[0].id).await.unwrap();
        assert_eq!(engine.status_counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn version_mismatch_records_conflict_and_pauses_entry() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"a": 1, "b": 2})).await;
        remote.queue_push(Ok(PushOutcome::VersionMismatch {
            remote_version: 5,
            remote_payload: json!({"a": 1, "b": 3}),
            remote_updated_at: 900,
        }));

        engine.sync_once().await.unwrap();

        assert_eq!(engine.status_counts().await.unwrap().conflicts, 1);
        let conflicts = engine.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_fields, vec!["b"]);
        assert_eq!(conflicts[0].remote_version, 5);
        // The local record keeps its payload until the conflict is resolved
        let record = record(&db, "r1").await.unwrap();
        assert!(record.is_dirty);
        assert_eq!(record.payload, json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn equal_payload_mismatch_is_benign() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"a": 1})).await;
        remote.queue_push(Ok(PushOutcome::VersionMismatch {
            remote_version: 5,
            remote_payload: json!({"a": 1}),
            remote_updated_at: 900,
        }));

        engine.sync_once().await.unwrap();

        assert!(engine.status_counts().await.unwrap().is_idle());
        assert!(engine.list_conflicts().await.unwrap().is_empty());
        let record = record(&db, "r1").await.unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.remote_version, Some(5));
    }

    #[tokio::test]
    async fn remote_resolution_overwrites_local_without_pushing() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"a": 1, "b": 2})).await;
        remote.queue_push(Ok(PushOutcome::VersionMismatch {
            remote_version: 5,
            remote_payload: json!({"a": 1, "b": 3}),
            remote_updated_at: 900,
        }));
        engine.sync_once().await.unwrap();
        let conflict_id = engine.list_conflicts().await.unwrap()[0].id;

        let resolved = engine
            .resolve_conflict(conflict_id, ResolutionStrategy::Remote, None)
            .await
            .unwrap();

        assert_eq!(resolved, json!({"a": 1, "b": 3}));
        assert!(engine.status_counts().await.unwrap().is_idle());
        assert!(engine.list_conflicts().await.unwrap().is_empty());
        let record = record(&db, "r1").await.unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.payload, json!({"a": 1, "b": 3}));
        assert_eq!(record.remote_version, Some(5));
    }

    #[tokio::test]
    async fn local_resolution_requeues_push_with_remote_base() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"a": 1, "b": 2})).await;
        remote.queue_push(Ok(PushOutcome::VersionMismatch {
            remote_version: 5,
            remote_payload: json!({"a": 1, "b": 3}),
            remote_updated_at: 900,
        }));
        engine.sync_once().await.unwrap();
        let conflict_id = engine.list_conflicts().await.unwrap()[0].id;

        engine
            .resolve_conflict(conflict_id, ResolutionStrategy::Local, None)
            .await
            .unwrap();
        assert_eq!(engine.status_counts().await.unwrap().pending, 1);

        remote.queue_push(Ok(PushOutcome::Applied { new_version: 6 }));
        engine.sync_once().await.unwrap();

        let pushes = remote.pushes();
        let last = pushes.last().unwrap();
        assert_eq!(last.expected_version, Some(5));
        assert_eq!(last.payload, json!({"a": 1, "b": 2}));
        assert!(engine.status_counts().await.unwrap().is_idle());
        assert_eq!(record(&db, "r1").await.unwrap().remote_version, Some(6));
    }

    #[tokio::test]
    async fn manual_resolution_writes_payload_through_the_store() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"a": 1, "b": 2})).await;
        remote.queue_push(Ok(PushOutcome::VersionMismatch {
            remote_version: 5,
            remote_payload: json!({"a": 1, "b": 3}),
            remote_updated_at: 900,
        }));
        engine.sync_once().await.unwrap();
        let conflict_id = engine.list_conflicts().await.unwrap()[0].id;

        let resolved = engine
            .resolve_conflict(
                conflict_id,
                ResolutionStrategy::Manual,
                Some(json!({"a": 1, "b": 9})),
            )
            .await
            .unwrap();

        assert_eq!(resolved, json!({"a": 1, "b": 9}));
        let record = record(&db, "r1").await.unwrap();
        assert_eq!(record.payload, json!({"a": 1, "b": 9}));
        assert!(record.is_dirty);
        // The merged payload is queued for another push
        assert_eq!(engine.status_counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn pull_applies_changes_and_advances_checkpoint() {
        let (engine, db, remote) = setup();
        remote.queue_pull(PullBatch {
            changes: vec![change("r9", json!({"x": 1}), 3)],
            checkpoint: "cp-1".to_string(),
        });

        let report = engine.sync_once().await.unwrap();
        assert_eq!(report.pulled, 1);
        let record = record(&db, "r9").await.unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.remote_version, Some(3));

        engine.sync_once().await.unwrap();
        let pulls = remote.pulls.lock().unwrap().clone();
        assert_eq!(pulls, vec![None, Some("cp-1".to_string())]);
    }

    #[tokio::test]
    async fn pull_against_dirty_local_records_conflict() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"a": 1, "b": 2})).await;
        remote.queue_pull(PullBatch {
            changes: vec![change("r1", json!({"a": 1, "b": 3}), 2)],
            checkpoint: "cp-1".to_string(),
        });

        engine.pull().await.unwrap();

        let conflicts = engine.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_fields, vec!["b"]);
        // The dirty local payload survives until resolution
        let record = record(&db, "r1").await.unwrap();
        assert!(record.is_dirty);
        assert_eq!(record.payload, json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn pull_matching_dirty_payload_converges_without_conflict() {
        let (engine, db, remote) = setup();
        put(&db, "r1", json!({"a": 1})).await;
        remote.queue_pull(PullBatch {
            changes: vec![change("r1", json!({"a": 1}), 2)],
            checkpoint: "cp-1".to_string(),
        });

        engine.pull().await.unwrap();

        assert!(engine.status_counts().await.unwrap().is_idle());
        let record = record(&db, "r1").await.unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.remote_version, Some(2));
    }

    #[tokio::test]
    async fn listeners_receive_counts_after_each_cycle() {
        let (engine, db, remote) = setup();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.subscribe(Box::new(move |counts| {
            sink.lock().unwrap().push(*counts);
        }));

        put(&db, "r1", json!({"v": 1})).await;
        remote.queue_push(Err(RemoteError::Transient("timeout".to_string())));
        engine.sync_once().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].pending, 1);
    }
}
