//! Database connection management

use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

use super::migrations;

/// Wrapper around the single local `SQLite` connection.
///
/// All engine components serialize their mutations through this handle;
/// it is the one shared mutable resource in the system.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations and restart recovery automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        database.recover_interrupted()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for concurrent readers and durable writes
    fn configure(&self) -> Result<()> {
        // WAL keeps readers unblocked for the duration of a commit
        self.conn.pragma_update(None, "journal_mode", "WAL").ok();
        self.conn
            .pragma_update(None, "synchronous", "NORMAL")
            .ok();
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.pragma_update(None, "cache_size", 10_000).ok();
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Demote work that was in flight when the previous process died.
    ///
    /// A crash mid-push or mid-upload must not strand entries in
    /// `syncing`/`uploading`; they go back to `pending` and are picked up
    /// on the next cycle (already-acknowledged chunks stay valid).
    fn recover_interrupted(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        let demoted_sync = self.conn.execute(
            "UPDATE sync_records SET status = 'pending', updated_at = ?1 WHERE status = 'syncing'",
            [now],
        )?;
        let demoted_uploads = self.conn.execute(
            "UPDATE upload_tasks SET status = 'pending', updated_at = ?1 WHERE status = 'uploading'",
            [now],
        )?;

        if demoted_sync > 0 || demoted_uploads > 0 {
            tracing::info!(
                demoted_sync,
                demoted_uploads,
                "Recovered interrupted sync/upload work"
            );
        }
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reopen_demotes_interrupted_work() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("scrib.db");

        {
            let db = Database::open(&path).unwrap();
            db.connection()
                .execute(
                    "INSERT INTO sync_records (table_name, record_id, operation, local_data, status, created_at, updated_at)
                     VALUES ('content_item', 'r1', 'update', '{}', 'syncing', 1, 1)",
                    [],
                )
                .unwrap();
            db.connection()
                .execute(
                    "INSERT INTO upload_tasks (id, source_path, filename, file_size, mime_type, status, chunk_size, total_chunks, created_at, updated_at)
                     VALUES ('t1', '/tmp/a.png', 'a.png', 10, 'image/png', 'uploading', 4, 3, 1, 1)",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let sync_status: String = db
            .connection()
            .query_row("SELECT status FROM sync_records", [], |row| row.get(0))
            .unwrap();
        let upload_status: String = db
            .connection()
            .query_row("SELECT status FROM upload_tasks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sync_status, "pending");
        assert_eq!(upload_status, "pending");
    }

    #[test]
    fn queue_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("scrib.db");

        {
            let db = Database::open(&path).unwrap();
            db.connection()
                .execute(
                    "INSERT INTO sync_records (table_name, record_id, operation, local_data, status, created_at, updated_at)
                     VALUES ('content_item', 'r1', 'create', '{\"a\":1}', 'pending', 1, 1)",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM sync_records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
