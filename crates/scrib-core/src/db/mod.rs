//! Storage layer for the scrib engine

mod connection;
mod conflicts;
mod migrations;
pub(crate) mod record_store;
mod sync_queue;
mod sync_state;
mod tracker;
mod uploads;

pub use connection::Database;
pub use conflicts::{NewConflict, SqliteConflictStore};
pub use record_store::{QueryOrder, RecordQuery, RecordStore, SqliteRecordStore};
pub use sync_queue::{SqliteSyncQueue, SyncStatusCounts};
pub use sync_state::SqliteSyncState;
pub use uploads::SqliteUploadStore;
