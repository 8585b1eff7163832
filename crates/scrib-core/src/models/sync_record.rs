//! Pending synchronization unit model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Kind of mutation a sync record replays against the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    /// Database/wire text encoding
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown sync operation: {other}"
            ))),
        }
    }
}

/// Lifecycle state of a sync record.
///
/// `pending → syncing → {completed, failed, conflict}`. Completed records
/// are garbage-collected rather than stored; `failed` here is the terminal
/// state reached after the retry budget is spent (a transiently failed
/// record goes back to `pending` with a backoff stamp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
    Conflict,
}

impl SyncStatus {
    /// Database/wire text encoding
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }

    /// Whether the queue still owns this entry for the coalescing rule
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::InvalidInput(format!("unknown sync status: {other}"))),
        }
    }
}

/// How a detected conflict was (or should be) resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Keep the local payload; remote is overwritten on next push
    Local,
    /// Take the remote payload; local store is overwritten
    Remote,
    /// Field-level union, newer side wins per conflicting field
    Merge,
    /// Caller supplies the resolved payload explicitly
    Manual,
}

impl ResolutionStrategy {
    /// Database/wire text encoding
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// One durable entry in the sync queue.
///
/// At most one live entry exists per `(table_name, record_id, operation)`
/// triple; later mutations coalesce into it by replacing `local_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Queue row identifier
    pub id: i64,
    /// Logical collection of the target record
    pub table_name: String,
    /// Target record identifier
    pub record_id: String,
    /// Mutation kind to replay
    pub operation: SyncOperation,
    /// Payload snapshot at enqueue time; `Value::Null` tombstone for deletes
    pub local_data: Value,
    /// Remote snapshot, populated only once a conflict is detected
    pub remote_data: Option<Value>,
    /// Queue state
    pub status: SyncStatus,
    /// Strategy recorded once the conflict (if any) was resolved
    pub conflict_resolution: Option<ResolutionStrategy>,
    /// Transient failures so far
    pub retry_count: u32,
    /// Retry budget before the entry goes terminal
    pub max_retries: u32,
    /// Remote version snapshot, sent as `expected_version` on push
    pub base_version: Option<i64>,
    /// Earliest time (Unix ms) this entry is eligible for a push attempt
    pub next_attempt_at: i64,
    /// Last failure message, for surfacing to the UI layer
    pub last_error: Option<String>,
    /// Enqueue timestamp (Unix ms); drives oldest-first ordering
    pub created_at: i64,
    /// Last coalesce/transition timestamp (Unix ms)
    pub updated_at: i64,
}

impl SyncRecord {
    /// Whether the automatic retry budget is spent
    #[must_use]
    pub const fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
