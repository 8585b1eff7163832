//! Data models for the scrib engine

mod conflict;
mod record;
mod sync_record;
mod upload;

pub use conflict::{ConflictStatus, SyncConflict};
pub use record::{Record, RecordId};
pub use sync_record::{ResolutionStrategy, SyncOperation, SyncRecord, SyncStatus};
pub use upload::{UploadStatus, UploadTask, UploadTaskId};
