//! Upload task model

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for an upload task, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadTaskId(Uuid);

impl UploadTaskId {
    /// Create a new unique task ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for UploadTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UploadTaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of an upload task.
///
/// `pending → uploading → {completed, failed}`; `uploading → cancelled`
/// on explicit cancel; `failed → pending` on manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    /// Database text encoding
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// States from which no automatic transition occurs
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::InvalidInput(format!(
                "unknown upload status: {other}"
            ))),
        }
    }
}

/// A chunked, resumable binary transfer tracked independently of the
/// sync queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    /// Task identifier
    pub id: UploadTaskId,
    /// Remote object identifier, set once the remote finalizes the upload
    pub file_id: Option<String>,
    /// Local file being transferred
    pub source_path: PathBuf,
    /// Display name sent to the remote
    pub filename: String,
    /// Size of the source file in bytes
    pub file_size: u64,
    /// MIME type of the payload
    pub mime_type: String,
    /// Lifecycle state
    pub status: UploadStatus,
    /// Chunk size in bytes
    pub chunk_size: u32,
    /// Number of chunks the file splits into (at least 1)
    pub total_chunks: u32,
    /// Chunk indices already acknowledged by the remote; resume skips these
    pub uploaded_chunks: BTreeSet<u32>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Manual retry budget
    pub max_retries: u32,
    /// Public URL reported by the remote on finalize
    pub remote_url: Option<String>,
    /// Last failure message
    pub last_error: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last transition timestamp (Unix ms)
    pub updated_at: i64,
}

impl UploadTask {
    /// Create a pending task for the given source file.
    #[must_use]
    pub fn new(
        source_path: impl Into<PathBuf>,
        filename: impl Into<String>,
        file_size: u64,
        mime_type: impl Into<String>,
        chunk_size: u32,
        max_retries: u32,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let chunk_size = chunk_size.max(1);
        let total_chunks = file_size
            .div_ceil(u64::from(chunk_size))
            .max(1)
            .try_into()
            .unwrap_or(u32::MAX);
        Self {
            id: UploadTaskId::new(),
            file_id: None,
            source_path: source_path.into(),
            filename: filename.into(),
            file_size,
            mime_type: mime_type.into(),
            status: UploadStatus::Pending,
            chunk_size,
            total_chunks,
            uploaded_chunks: BTreeSet::new(),
            retry_count: 0,
            max_retries,
            remote_url: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transfer progress, 0–100
    #[must_use]
    pub fn progress(&self) -> u8 {
        if self.status == UploadStatus::Completed {
            return 100;
        }
        let done = self.uploaded_chunks.len() as u64 * 100 / u64::from(self.total_chunks);
        done.min(100) as u8
    }

    /// Chunk indices still awaiting acknowledgement, in order
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|index| !self.uploaded_chunks.contains(index))
            .collect()
    }

    /// Byte length of the chunk at `index` (the last chunk may be short)
    #[must_use]
    pub fn chunk_len(&self, index: u32) -> u64 {
        let start = u64::from(index) * u64::from(self.chunk_size);
        self.file_size
            .saturating_sub(start)
            .min(u64::from(self.chunk_size))
    }

    /// Whether a manual retry is still allowed
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        matches!(self.status, UploadStatus::Failed) && self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(file_size: u64, chunk_size: u32) -> UploadTask {
        UploadTask::new(
            "/tmp/photo.png",
            "photo.png",
            file_size,
            "image/png",
            chunk_size,
            3,
        )
    }

    #[test]
    fn task_id_round_trips_through_display() {
        let id = UploadTaskId::new();
        assert_eq!(id.to_string().parse::<UploadTaskId>().unwrap(), id);
    }

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(task(100, 30).total_chunks, 4);
        assert_eq!(task(90, 30).total_chunks, 3);
        assert_eq!(task(0, 30).total_chunks, 1);
    }

    #[test]
    fn last_chunk_may_be_short() {
        let t = task(100, 30);
        assert_eq!(t.chunk_len(0), 30);
        assert_eq!(t.chunk_len(3), 10);
    }

    #[test]
    fn progress_tracks_acknowledged_chunks() {
        let mut t = task(100, 10);
        assert_eq!(t.progress(), 0);
        t.uploaded_chunks.extend([0, 1, 2]);
        assert_eq!(t.progress(), 30);
    }

    #[test]
    fn missing_chunks_skips_acknowledged() {
        let mut t = task(100, 10);
        t.uploaded_chunks.extend([0, 1, 2]);
        assert_eq!(t.missing_chunks(), vec![3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn retry_requires_failed_state_under_budget() {
        let mut t = task(10, 10);
        assert!(!t.can_retry());
        t.status = UploadStatus::Failed;
        t.retry_count = 2;
        assert!(t.can_retry());
        t.retry_count = 3;
        assert!(!t.can_retry());
    }
}
