//! Remote sync collaborator seam

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;
use crate::models::SyncOperation;

/// One queued mutation, ready to replay against the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushRequest {
    /// Logical collection
    pub table_name: String,
    /// Record identifier
    pub record_id: String,
    /// Mutation kind
    pub operation: SyncOperation,
    /// Payload snapshot (`Value::Null` tombstone for deletes)
    pub payload: Value,
    /// Last remote version this client saw; lets the remote detect
    /// staleness
    pub expected_version: Option<i64>,
}

/// Result of a push the remote actually processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote accepted the mutation
    Applied {
        /// Version the remote assigned
        new_version: i64,
    },
    /// The remote holds a newer version than `expected_version`
    VersionMismatch {
        /// The remote's current version
        remote_version: i64,
        /// The remote's current payload (`Value::Null` if deleted there)
        remote_payload: Value,
        /// When the remote payload last changed (Unix ms)
        remote_updated_at: i64,
    },
}

/// One record change in the remote change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Logical collection
    pub table_name: String,
    /// Record identifier
    pub record_id: String,
    /// Current remote payload
    pub payload: Value,
    /// Remote version of this change
    pub version: i64,
    /// When the remote payload last changed (Unix ms)
    pub updated_at: i64,
    /// Set when the record was deleted remotely (Unix ms)
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

/// A page of remote changes plus the cursor to resume from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullBatch {
    /// Changes since the requested checkpoint, in remote order
    pub changes: Vec<RemoteChange>,
    /// Cursor to persist once every change is applied
    pub checkpoint: String,
}

/// The remote sync collaborator.
///
/// The engine is generic over this trait; tests inject in-memory fakes
/// and production wires up [`HttpRemote`](crate::sync::HttpRemote).
#[allow(async_fn_in_trait)]
pub trait RemoteSync {
    /// Replay one local mutation against the remote
    async fn push(&self, request: &PushRequest) -> Result<PushOutcome, RemoteError>;

    /// Fetch remote changes since `since` (`None` for the full stream)
    async fn pull(&self, since: Option<&str>) -> Result<PullBatch, RemoteError>;
}
