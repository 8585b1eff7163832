//! Mutation tracker: dirty-flag stamping and sync queue coalescing.
//!
//! Runs inside the record store's transaction so a record write and its
//! queue entry commit (or fail) together. Only the sync engine ever clears
//! dirty state; the tracker only sets it.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::Result;
use crate::models::{RecordId, SyncOperation};

/// Upsert the queue entry for a local create/update.
///
/// If a live entry for this record already exists with a `create` or
/// `update` operation, the new snapshot replaces its `local_data` (the
/// operation is kept; an unpushed create stays a create). A terminal
/// `failed` entry is revived with a fresh retry budget.
pub(crate) fn track_write(
    conn: &Connection,
    table: &str,
    id: &RecordId,
    operation_if_new: SyncOperation,
    payload: &Value,
    base_version: Option<i64>,
    max_retries: u32,
    now: i64,
) -> Result<()> {
    coalesce_or_insert(
        conn,
        table,
        id,
        &["create", "update"],
        operation_if_new,
        payload,
        base_version,
        max_retries,
        now,
    )
}

/// Upsert the queue entry for a local delete. `local_data` is the
/// `Value::Null` tombstone.
pub(crate) fn track_delete(
    conn: &Connection,
    table: &str,
    id: &RecordId,
    base_version: Option<i64>,
    max_retries: u32,
    now: i64,
) -> Result<()> {
    coalesce_or_insert(
        conn,
        table,
        id,
        &["delete"],
        SyncOperation::Delete,
        &Value::Null,
        base_version,
        max_retries,
        now,
    )
}

#[allow(clippy::too_many_arguments)]
fn coalesce_or_insert(
    conn: &Connection,
    table: &str,
    id: &RecordId,
    coalesce_ops: &[&str],
    operation_if_new: SyncOperation,
    payload: &Value,
    base_version: Option<i64>,
    max_retries: u32,
    now: i64,
) -> Result<()> {
    let op_filter = match coalesce_ops {
        ["delete"] => "operation = 'delete'",
        _ => "operation IN ('create', 'update')",
    };

    let existing: Option<(i64, String)> = conn
        .query_row(
            &format!(
                "SELECT id, status FROM sync_records
                 WHERE table_name = ?1 AND record_id = ?2 AND {op_filter}
                   AND status IN ('pending', 'syncing', 'failed', 'conflict')
                 LIMIT 1"
            ),
            params![table, id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let payload_text = serde_json::to_string(payload)?;

    if let Some((entry_id, status)) = existing {
        if status == "failed" {
            // A fresh local snapshot deserves a fresh retry budget
            conn.execute(
                "UPDATE sync_records
                 SET local_data = ?1, base_version = ?2, status = 'pending',
                     retry_count = 0, next_attempt_at = ?3, last_error = NULL,
                     updated_at = ?3
                 WHERE id = ?4",
                params![payload_text, base_version, now, entry_id],
            )?;
        } else {
            conn.execute(
                "UPDATE sync_records
                 SET local_data = ?1, base_version = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![payload_text, base_version, now, entry_id],
            )?;
        }
        tracing::debug!(table, record_id = %id, entry_id, "Coalesced mutation into queue entry");
    } else {
        conn.execute(
            "INSERT INTO sync_records
                 (table_name, record_id, operation, local_data, status,
                  retry_count, max_retries, base_version, next_attempt_at,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7, ?7, ?7)",
            params![
                table,
                id.as_str(),
                operation_if_new.as_str(),
                payload_text,
                max_retries,
                base_version,
                now
            ],
        )?;
        tracing::debug!(table, record_id = %id, operation = %operation_if_new, "Enqueued sync record");
    }

    Ok(())
}
