//! Durable sync queue repository

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{ResolutionStrategy, SyncRecord, SyncStatus};

/// Aggregate queue state surfaced to the UI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatusCounts {
    /// Entries waiting for a push attempt (including backoff waits)
    pub pending: usize,
    /// Entries with a push in flight
    pub syncing: usize,
    /// Entries whose retry budget is spent; manual intervention required
    pub failed: usize,
    /// Entries paused on an unresolved conflict
    pub conflicts: usize,
}

impl SyncStatusCounts {
    /// True when nothing is queued or stuck
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.pending == 0 && self.syncing == 0 && self.failed == 0 && self.conflicts == 0
    }
}

/// `SQLite` repository for the sync queue state machine.
///
/// Transitions: `pending → syncing → {completed, failed, conflict}`.
/// Completed entries are deleted (the queue only holds outstanding work);
/// a transiently failed entry goes back to `pending` with a backoff stamp,
/// and `failed` is the terminal, manually-requeueable state.
pub struct SqliteSyncQueue<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncQueue<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a sync record from a database row
    fn parse_sync_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
        let to_conversion_err = |idx: usize, e: Error| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        };

        let operation: String = row.get(3)?;
        let status: String = row.get(6)?;
        let resolution: Option<String> = row.get(7)?;

        Ok(SyncRecord {
            id: row.get(0)?,
            table_name: row.get(1)?,
            record_id: row.get(2)?,
            operation: operation.parse().map_err(|e| to_conversion_err(3, e))?,
            local_data: row.get(4)?,
            remote_data: row.get(5)?,
            status: status.parse().map_err(|e| to_conversion_err(6, e))?,
            conflict_resolution: resolution
                .map(|s| s.parse().map_err(|e| to_conversion_err(7, e)))
                .transpose()?,
            retry_count: row.get(8)?,
            max_retries: row.get(9)?,
            base_version: row.get(10)?,
            next_attempt_at: row.get(11)?,
            last_error: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    const SELECT: &'static str =
        "SELECT id, table_name, record_id, operation, local_data, remote_data, status,
                conflict_resolution, retry_count, max_retries, base_version, next_attempt_at,
                last_error, created_at, updated_at
         FROM sync_records";

    /// Get a queue entry by ID
    pub fn get(&self, id: i64) -> Result<Option<SyncRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", Self::SELECT),
                params![id],
                Self::parse_sync_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Entries eligible for a push attempt at `now`, oldest first.
    ///
    /// Oldest-first ordering preserves causal order of mutations to the
    /// same record.
    pub fn due(&self, now: i64) -> Result<Vec<SyncRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE status = 'pending' AND next_attempt_at <= ?1
             ORDER BY created_at ASC, id ASC",
            Self::SELECT
        ))?;
        let records = stmt
            .query_map(params![now], Self::parse_sync_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// The live queue entry for a record, if any (latest if several
    /// operations are queued). Used by the pull path to detect a dirty
    /// local counterpart.
    pub fn live_entry(&self, table: &str, record_id: &str) -> Result<Option<SyncRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "{} WHERE table_name = ?1 AND record_id = ?2
                       AND status IN ('pending', 'syncing', 'failed', 'conflict')
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    Self::SELECT
                ),
                params![table, record_id],
                Self::parse_sync_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Transition `pending → syncing`. Returns the claimed snapshot, or
    /// `None` if the entry was taken or transitioned by someone else.
    pub fn claim(&self, id: i64, now: i64) -> Result<Option<SyncRecord>> {
        let rows = self.conn.execute(
            "UPDATE sync_records SET status = 'syncing', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now, id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get(id)
    }

    /// Complete a pushed entry, honoring mid-flight coalescing.
    ///
    /// Deletes the entry only if no newer snapshot coalesced into it since
    /// `claimed_at`; otherwise the entry is demoted back to `pending` so
    /// the newer payload gets pushed. Returns whether the entry completed.
    pub fn complete(&self, id: i64, claimed_at: i64, now: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM sync_records WHERE id = ?1 AND updated_at <= ?2",
            params![id, claimed_at],
        )?;
        if deleted > 0 {
            return Ok(true);
        }

        self.conn.execute(
            "UPDATE sync_records
             SET status = 'pending', next_attempt_at = ?1, updated_at = ?1
             WHERE id = ?2",
            params![now, id],
        )?;
        tracing::debug!(id, "Entry re-dirtied mid-push; demoted back to pending");
        Ok(false)
    }

    /// Record a transient failure: requeue with backoff while budget
    /// remains, otherwise go terminal. Returns the resulting status.
    pub fn mark_transient_failure(
        &self,
        id: i64,
        error: &str,
        backoff_ms: i64,
        now: i64,
    ) -> Result<SyncStatus> {
        let entry = self.get(id)?.ok_or_else(|| Error::not_found("sync_records", id))?;
        let retry_count = entry.retry_count + 1;

        if retry_count < entry.max_retries {
            self.conn.execute(
                "UPDATE sync_records
                 SET status = 'pending', retry_count = ?1, next_attempt_at = ?2,
                     last_error = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![retry_count, now + backoff_ms, error, now, id],
            )?;
            Ok(SyncStatus::Pending)
        } else {
            self.conn.execute(
                "UPDATE sync_records
                 SET status = 'failed', retry_count = ?1, last_error = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![retry_count, error, now, id],
            )?;
            Ok(SyncStatus::Failed)
        }
    }

    /// Record a permanent failure: terminal immediately, retries are not
    /// consumed on a request the remote will never accept.
    pub fn mark_permanent_failure(&self, id: i64, error: &str, now: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_records
             SET status = 'failed', last_error = ?1, updated_at = ?2
             WHERE id = ?3",
            params![error, now, id],
        )?;
        Ok(())
    }

    /// Transition to `conflict`, storing the remote snapshot for the
    /// resolver. Automatic progress for this record pauses until resolved.
    pub fn mark_conflict(&self, id: i64, remote_data: &Value, now: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_records
             SET status = 'conflict', remote_data = ?1, updated_at = ?2
             WHERE id = ?3",
            params![serde_json::to_string(remote_data)?, now, id],
        )?;
        Ok(())
    }

    /// Requeue a conflicted entry with its resolved payload for another
    /// push. `base_version` is set to the conflicting remote version so the
    /// next push passes the staleness check.
    pub fn resolve_to_pending(
        &self,
        id: i64,
        resolved_data: &Value,
        base_version: i64,
        resolution: ResolutionStrategy,
        now: i64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_records
             SET status = 'pending', local_data = ?1, base_version = ?2,
                 conflict_resolution = ?3, retry_count = 0, next_attempt_at = ?4,
                 remote_data = NULL, last_error = NULL, updated_at = ?4
             WHERE id = ?5",
            params![
                serde_json::to_string(resolved_data)?,
                base_version,
                resolution.as_str(),
                now,
                id
            ],
        )?;
        Ok(())
    }

    /// Complete a conflicted entry whose resolution needs no further push
    /// (remote won, or the divergence was benign).
    pub fn complete_resolved(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_records WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Entries in terminal `failed` state, oldest first
    pub fn list_failed(&self) -> Result<Vec<SyncRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE status = 'failed' ORDER BY created_at ASC, id ASC",
            Self::SELECT
        ))?;
        let records = stmt
            .query_map([], Self::parse_sync_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Manually requeue a terminally failed entry with a fresh budget
    pub fn requeue_failed(&self, id: i64, now: i64) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_records
             SET status = 'pending', retry_count = 0, next_attempt_at = ?1,
                 last_error = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'failed'",
            params![now, id],
        )?;
        if rows == 0 {
            return Err(Error::InvalidInput(format!(
                "sync record {id} is not in a failed state"
            )));
        }
        Ok(())
    }

    /// Current queue counts by status
    pub fn counts(&self) -> Result<SyncStatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sync_records GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = SyncStatusCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => counts.pending = count,
                "syncing" => counts.syncing = count,
                "failed" => counts.failed = count,
                "conflict" => counts.conflicts = count,
                _ => {}
            }
        }
        Ok(counts)
    }
}
