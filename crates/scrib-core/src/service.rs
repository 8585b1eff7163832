//! Shared database service wrapper used across clients.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::db::{
    Database, RecordQuery, RecordStore, SqliteConflictStore, SqliteRecordStore, SqliteSyncQueue,
    SyncStatusCounts,
};
use crate::models::{Record, RecordId, SyncConflict};
use crate::Result;

/// Thread-safe service for store and queue operations.
///
/// Cheap to clone; all clones share the one connection. The sync engine
/// and upload queue are built over [`handle`](Self::handle).
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    max_retries: u32,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>, config: &EngineConfig) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            max_retries: config.max_retries,
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub fn open_in_memory(config: &EngineConfig) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            max_retries: config.max_retries,
        })
    }

    /// Shared handle for wiring up the sync engine and upload queue
    #[must_use]
    pub fn handle(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }

    /// Create or replace a record. A fresh ID is generated when `id` is
    /// `None`; the mutation is tracked for sync either way.
    pub async fn put_record(
        &self,
        table: &str,
        id: Option<RecordId>,
        payload: Value,
    ) -> Result<Record> {
        let id = id.unwrap_or_else(RecordId::generate);
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection())
            .with_max_retries(self.max_retries)
            .put(table, &id, payload)
    }

    /// Fetch a record by table and ID.
    pub async fn get_record(&self, table: &str, id: &RecordId) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).get(table, id)
    }

    /// Query records in a table with an in-process predicate.
    pub async fn query_records(
        &self,
        table: &str,
        options: &RecordQuery,
        predicate: impl Fn(&Record) -> bool,
    ) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).query(table, options, predicate)
    }

    /// Delete a record, tracking the deletion for sync.
    pub async fn delete_record(&self, table: &str, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection())
            .with_max_retries(self.max_retries)
            .delete(table, id)
    }

    /// Unresolved sync conflicts, oldest first.
    pub async fn list_conflicts(&self) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictStore::new(db.connection()).list_pending()
    }

    /// Current sync queue counts by status.
    pub async fn sync_status(&self) -> Result<SyncStatusCounts> {
        let db = self.db.lock().await;
        SqliteSyncQueue::new(db.connection()).counts()
    }

    /// Cursor of the last fully applied pull batch, if any.
    pub async fn sync_checkpoint(&self) -> Result<Option<String>> {
        let db = self.db.lock().await;
        crate::db::SqliteSyncState::new(db.connection()).checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> DatabaseService {
        DatabaseService::open_in_memory(&EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn put_generates_id_when_absent() {
        let service = setup();
        let record = service
            .put_record("content_item", None, json!({"title": "Draft"}))
            .await
            .unwrap();
        assert!(!record.id.as_str().is_empty());

        let fetched = service
            .get_record("content_item", &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.payload, json!({"title": "Draft"}));
    }

    #[tokio::test]
    async fn crud_round_trip_tracks_sync_state() {
        let service = setup();
        let id = RecordId::from("r1");

        service
            .put_record("content_item", Some(id.clone()), json!({"v": 1}))
            .await
            .unwrap();
        assert_eq!(service.sync_status().await.unwrap().pending, 1);

        service.delete_record("content_item", &id).await.unwrap();
        assert!(service
            .get_record("content_item", &id)
            .await
            .unwrap()
            .is_none());
        // Create and delete entries both await push
        assert_eq!(service.sync_status().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn query_respects_options() {
        let service = setup();
        for i in 0..4 {
            service
                .put_record(
                    "content_item",
                    Some(RecordId::from(format!("r{i}"))),
                    json!({"rank": i}),
                )
                .await
                .unwrap();
        }

        let options = RecordQuery {
            order: crate::db::QueryOrder::CreatedAsc,
            limit: Some(2),
            offset: 0,
        };
        let results = service
            .query_records("content_item", &options, |record| {
                record.payload["rank"].as_i64().unwrap_or(0) >= 2
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].payload["rank"], 2);
    }

    #[tokio::test]
    async fn open_path_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scrib.db");
        let service = DatabaseService::open_path(&path, &EngineConfig::default()).unwrap();
        service
            .put_record("content_item", None, json!({}))
            .await
            .unwrap();
        assert!(path.exists());
    }
}
