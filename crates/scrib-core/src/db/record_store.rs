//! Record store implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::config::DEFAULT_MAX_RETRIES;
use crate::error::{Error, Result};
use crate::models::{Record, RecordId, SyncOperation};

use super::tracker;

/// Ordering for record queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    CreatedAsc,
    CreatedDesc,
    UpdatedAsc,
    #[default]
    UpdatedDesc,
}

impl QueryOrder {
    const fn sql(self) -> &'static str {
        match self {
            Self::CreatedAsc => "created_at ASC",
            Self::CreatedDesc => "created_at DESC",
            Self::UpdatedAsc => "updated_at ASC",
            Self::UpdatedDesc => "updated_at DESC",
        }
    }
}

/// Pagination and ordering options for [`RecordStore::query`]
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Sort order applied before the predicate
    pub order: QueryOrder,
    /// Maximum rows returned after predicate filtering
    pub limit: Option<usize>,
    /// Rows skipped after predicate filtering
    pub offset: usize,
}

/// Trait for typed record storage operations
pub trait RecordStore {
    /// Create or replace a record; stamps timestamps, marks it dirty and
    /// enqueues the sync unit in the same transaction
    fn put(&self, table: &str, id: &RecordId, payload: Value) -> Result<Record>;

    /// Get a record by table and ID
    fn get(&self, table: &str, id: &RecordId) -> Result<Option<Record>>;

    /// Query records in a table with an in-process predicate
    fn query(
        &self,
        table: &str,
        options: &RecordQuery,
        predicate: impl Fn(&Record) -> bool,
    ) -> Result<Vec<Record>>;

    /// Delete a record; enqueues a delete tombstone in the same transaction
    fn delete(&self, table: &str, id: &RecordId) -> Result<()>;
}

/// `SQLite` implementation of `RecordStore`
pub struct SqliteRecordStore<'a> {
    conn: &'a Connection,
    max_retries: u32,
}

impl<'a> SqliteRecordStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the retry budget stamped onto new sync records
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        Ok(Record {
            table_name: row.get(0)?,
            id: RecordId::from(row.get::<_, String>(1)?),
            payload: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            is_dirty: row.get::<_, i32>(5)? != 0,
            synced_at: row.get(6)?,
            remote_version: row.get(7)?,
        })
    }

    fn get_row(conn: &Connection, table: &str, id: &RecordId) -> Result<Option<Record>> {
        let record = conn
            .query_row(
                "SELECT table_name, id, payload, created_at, updated_at, is_dirty, synced_at, remote_version
                 FROM records WHERE table_name = ?1 AND id = ?2",
                params![table, id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Apply a record pulled from the remote.
    ///
    /// Engine-only: writes the payload without marking the record dirty.
    /// Idempotent — a duplicate delivery of an already-applied change is a
    /// no-op. Returns whether anything changed.
    pub fn apply_remote(
        &self,
        table: &str,
        id: &RecordId,
        payload: &Value,
        version: i64,
        deleted: bool,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let tx = self.conn.unchecked_transaction()?;
        let existing = Self::get_row(&tx, table, id)?;

        let changed = if deleted {
            match existing {
                Some(_) => {
                    tx.execute(
                        "DELETE FROM records WHERE table_name = ?1 AND id = ?2",
                        params![table, id.as_str()],
                    )?;
                    true
                }
                None => false,
            }
        } else {
            match existing {
                Some(record)
                    if record.payload == *payload
                        && record.remote_version == Some(version) =>
                {
                    false
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE records
                         SET payload = ?1, updated_at = ?2, is_dirty = 0,
                             synced_at = ?2, remote_version = ?3
                         WHERE table_name = ?4 AND id = ?5",
                        params![
                            serde_json::to_string(payload)?,
                            now,
                            version,
                            table,
                            id.as_str()
                        ],
                    )?;
                    true
                }
                None => {
                    tx.execute(
                        "INSERT INTO records
                             (table_name, id, payload, created_at, updated_at,
                              is_dirty, synced_at, remote_version)
                         VALUES (?1, ?2, ?3, ?4, ?4, 0, ?4, ?5)",
                        params![table, id.as_str(), serde_json::to_string(payload)?, now, version],
                    )?;
                    true
                }
            }
        };

        tx.commit()?;
        Ok(changed)
    }

    /// Confirm a successful push: clear the dirty flag and stamp sync state.
    ///
    /// Engine-only. Guarded by `as_of` so a record mutated after the pushed
    /// snapshot keeps its dirty flag (the coalesced queue entry will push
    /// the newer payload).
    pub fn mark_synced(
        &self,
        table: &str,
        id: &RecordId,
        new_version: i64,
        as_of: i64,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn.execute(
            "UPDATE records
             SET is_dirty = 0, synced_at = ?1, remote_version = ?2
             WHERE table_name = ?3 AND id = ?4 AND updated_at <= ?5",
            params![now, new_version, table, id.as_str(), as_of],
        )?;
        Ok(())
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn put(&self, table: &str, id: &RecordId, payload: Value) -> Result<Record> {
        let now = chrono::Utc::now().timestamp_millis();
        let tx = self.conn.unchecked_transaction()?;

        let existing = Self::get_row(&tx, table, id)?;
        let (created_at, synced_at, remote_version, operation) = match &existing {
            Some(record) => (
                record.created_at,
                record.synced_at,
                record.remote_version,
                SyncOperation::Update,
            ),
            None => (now, None, None, SyncOperation::Create),
        };

        tx.execute(
            "INSERT OR REPLACE INTO records
                 (table_name, id, payload, created_at, updated_at, is_dirty, synced_at, remote_version)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
            params![
                table,
                id.as_str(),
                serde_json::to_string(&payload)?,
                created_at,
                now,
                synced_at,
                remote_version
            ],
        )?;

        tracker::track_write(
            &tx,
            table,
            id,
            operation,
            &payload,
            remote_version,
            self.max_retries,
            now,
        )?;

        tx.commit()?;

        Ok(Record {
            id: id.clone(),
            table_name: table.to_string(),
            payload,
            created_at,
            updated_at: now,
            is_dirty: true,
            synced_at,
            remote_version,
        })
    }

    fn get(&self, table: &str, id: &RecordId) -> Result<Option<Record>> {
        Self::get_row(self.conn, table, id)
    }

    fn query(
        &self,
        table: &str,
        options: &RecordQuery,
        predicate: impl Fn(&Record) -> bool,
    ) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT table_name, id, payload, created_at, updated_at, is_dirty, synced_at, remote_version
             FROM records WHERE table_name = ?1 ORDER BY {}, id ASC",
            options.order.sql()
        ))?;

        let records = stmt
            .query_map(params![table], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records
            .into_iter()
            .filter(|record| predicate(record))
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn delete(&self, table: &str, id: &RecordId) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let tx = self.conn.unchecked_transaction()?;

        let existing =
            Self::get_row(&tx, table, id)?.ok_or_else(|| Error::not_found(table, id))?;

        tx.execute(
            "DELETE FROM records WHERE table_name = ?1 AND id = ?2",
            params![table, id.as_str()],
        )?;

        tracker::track_delete(
            &tx,
            table,
            id,
            existing.remote_version,
            self.max_retries,
            now,
        )?;

        tx.commit()?;
        Ok(())
    }
}
