//! Sync conflict repository

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{ResolutionStrategy, SyncConflict};

/// Snapshot pair handed to the repository when reconciliation detects
/// divergence.
#[derive(Debug, Clone)]
pub struct NewConflict {
    /// Queue entry that hit the conflict, when one exists
    pub sync_record_id: Option<i64>,
    /// Logical collection
    pub table_name: String,
    /// Record identifier
    pub record_id: String,
    /// Full local snapshot
    pub local_data: Value,
    /// Full remote snapshot
    pub remote_data: Value,
    /// Differing top-level payload keys
    pub conflict_fields: Vec<String>,
    /// Local mutation timestamp (Unix ms)
    pub local_updated_at: i64,
    /// Remote mutation timestamp (Unix ms)
    pub remote_updated_at: i64,
    /// Remote version at detection time
    pub remote_version: i64,
}

/// `SQLite` repository for materialized conflicts.
///
/// Resolved conflicts are kept with their resolution for audit.
pub struct SqliteConflictStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictStore<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    const SELECT: &'static str =
        "SELECT id, sync_record_id, table_name, record_id, local_data, remote_data,
                conflict_fields, local_updated_at, remote_updated_at, remote_version,
                status, resolution, resolved_data, created_at, resolved_at
         FROM sync_conflicts";

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncConflict> {
        let to_conversion_err = |idx: usize, e: Error| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        };

        let fields: Value = row.get(6)?;
        let status: String = row.get(10)?;
        let resolution: Option<String> = row.get(11)?;

        Ok(SyncConflict {
            id: row.get(0)?,
            sync_record_id: row.get(1)?,
            table_name: row.get(2)?,
            record_id: row.get(3)?,
            local_data: row.get(4)?,
            remote_data: row.get(5)?,
            conflict_fields: serde_json::from_value(fields).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            local_updated_at: row.get(7)?,
            remote_updated_at: row.get(8)?,
            remote_version: row.get(9)?,
            status: status.parse().map_err(|e| to_conversion_err(10, e))?,
            resolution: resolution
                .map(|s| s.parse().map_err(|e| to_conversion_err(11, e)))
                .transpose()?,
            resolved_data: row.get(12)?,
            created_at: row.get(13)?,
            resolved_at: row.get(14)?,
        })
    }

    /// Record a detected conflict. A pending conflict for the same record
    /// is replaced (repeated pulls/pushes must not pile up duplicates).
    pub fn upsert_pending(&self, conflict: &NewConflict, now: i64) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM sync_conflicts
                 WHERE table_name = ?1 AND record_id = ?2 AND status = 'pending'",
                params![conflict.table_name, conflict.record_id],
                |row| row.get(0),
            )
            .optional()?;

        let fields_text = serde_json::to_string(&conflict.conflict_fields)?;
        let local_text = serde_json::to_string(&conflict.local_data)?;
        let remote_text = serde_json::to_string(&conflict.remote_data)?;

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE sync_conflicts
                 SET sync_record_id = ?1, local_data = ?2, remote_data = ?3,
                     conflict_fields = ?4, local_updated_at = ?5,
                     remote_updated_at = ?6, remote_version = ?7, created_at = ?8
                 WHERE id = ?9",
                params![
                    conflict.sync_record_id,
                    local_text,
                    remote_text,
                    fields_text,
                    conflict.local_updated_at,
                    conflict.remote_updated_at,
                    conflict.remote_version,
                    now,
                    id
                ],
            )?;
            Ok(id)
        } else {
            self.conn.execute(
                "INSERT INTO sync_conflicts
                     (sync_record_id, table_name, record_id, local_data, remote_data,
                      conflict_fields, local_updated_at, remote_updated_at,
                      remote_version, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10)",
                params![
                    conflict.sync_record_id,
                    conflict.table_name,
                    conflict.record_id,
                    local_text,
                    remote_text,
                    fields_text,
                    conflict.local_updated_at,
                    conflict.remote_updated_at,
                    conflict.remote_version,
                    now
                ],
            )?;
            Ok(self.conn.last_insert_rowid())
        }
    }

    /// Get a conflict by ID
    pub fn get(&self, id: i64) -> Result<Option<SyncConflict>> {
        let conflict = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", Self::SELECT),
                params![id],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    /// Unresolved conflicts, oldest first
    pub fn list_pending(&self) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE status = 'pending' ORDER BY created_at ASC, id ASC",
            Self::SELECT
        ))?;
        let conflicts = stmt
            .query_map([], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }

    /// Mark a conflict resolved, keeping the resolution for audit
    pub fn mark_resolved(
        &self,
        id: i64,
        resolution: ResolutionStrategy,
        resolved_data: &Value,
        now: i64,
    ) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts
             SET status = 'resolved', resolution = ?1, resolved_data = ?2, resolved_at = ?3
             WHERE id = ?4 AND status = 'pending'",
            params![
                resolution.as_str(),
                serde_json::to_string(resolved_data)?,
                now,
                id
            ],
        )?;
        if rows == 0 {
            return Err(Error::InvalidInput(format!(
                "conflict {id} is not pending"
            )));
        }
        Ok(())
    }
}
