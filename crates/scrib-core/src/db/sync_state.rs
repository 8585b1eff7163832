//! Engine-internal key/value state (pull checkpoint)

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

const CHECKPOINT_KEY: &str = "pull_checkpoint";

/// `SQLite` repository for small engine-owned state values.
pub struct SqliteSyncState<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncState<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Cursor of the last successfully applied pull batch
    pub fn checkpoint(&self) -> Result<Option<String>> {
        self.get(CHECKPOINT_KEY)
    }

    /// Advance the pull cursor after a batch is fully applied
    pub fn set_checkpoint(&self, checkpoint: &str) -> Result<()> {
        self.set(CHECKPOINT_KEY, checkpoint)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn checkpoint_starts_empty_and_advances() {
        let db = Database::open_in_memory().unwrap();
        let state = SqliteSyncState::new(db.connection());

        assert_eq!(state.checkpoint().unwrap(), None);
        state.set_checkpoint("cursor-17").unwrap();
        assert_eq!(state.checkpoint().unwrap().as_deref(), Some("cursor-17"));
        state.set_checkpoint("cursor-18").unwrap();
        assert_eq!(state.checkpoint().unwrap().as_deref(), Some("cursor-18"));
    }
}
