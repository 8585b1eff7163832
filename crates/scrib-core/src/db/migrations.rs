//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: record store, sync queue, conflicts, checkpoint
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS records (
            table_name TEXT NOT NULL,
            id TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_dirty INTEGER NOT NULL DEFAULT 0,
            synced_at INTEGER,
            remote_version INTEGER,
            PRIMARY KEY (table_name, id)
        );
        CREATE INDEX IF NOT EXISTS idx_records_dirty ON records(table_name, is_dirty);
        CREATE INDEX IF NOT EXISTS idx_records_updated ON records(updated_at DESC);

        CREATE TABLE IF NOT EXISTS sync_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            local_data TEXT NOT NULL,
            remote_data TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            conflict_resolution TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            base_version INTEGER,
            next_attempt_at INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_records_live
            ON sync_records(table_name, record_id, operation)
            WHERE status IN ('pending', 'syncing', 'failed', 'conflict');
        CREATE INDEX IF NOT EXISTS idx_sync_records_due
            ON sync_records(status, next_attempt_at);
        CREATE INDEX IF NOT EXISTS idx_sync_records_created
            ON sync_records(created_at ASC);

        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sync_record_id INTEGER,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            local_data TEXT NOT NULL,
            remote_data TEXT NOT NULL,
            conflict_fields TEXT NOT NULL,
            local_updated_at INTEGER NOT NULL,
            remote_updated_at INTEGER NOT NULL,
            remote_version INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            resolution TEXT,
            resolved_data TEXT,
            created_at INTEGER NOT NULL,
            resolved_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record
            ON sync_conflicts(table_name, record_id);
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_status
            ON sync_conflicts(status);

        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: upload task queue
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS upload_tasks (
            id TEXT PRIMARY KEY,
            file_id TEXT,
            source_path TEXT NOT NULL,
            filename TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            chunk_size INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            uploaded_chunks TEXT NOT NULL DEFAULT '[]',
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            remote_url TEXT,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_upload_tasks_status ON upload_tasks(status);
        CREATE INDEX IF NOT EXISTS idx_upload_tasks_created ON upload_tasks(created_at ASC);

        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
