//! Record envelope model

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier of a record within its table.
///
/// Caller-supplied identifiers are accepted verbatim; generated ones use
/// UUID v7 so they sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a new time-sortable identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Borrow the string form of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Generic envelope wrapping one domain entity.
///
/// The payload schema belongs to the owning table; the engine only cares
/// about the sync bookkeeping around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier within `table_name`, immutable
    pub id: RecordId,
    /// Logical collection name (e.g. `content_item`, `media_file`)
    pub table_name: String,
    /// Entity-specific fields
    pub payload: Value,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local mutation timestamp (Unix ms)
    pub updated_at: i64,
    /// True while the local payload has not been confirmed synced
    pub is_dirty: bool,
    /// Timestamp of the last successful sync, if any (Unix ms)
    pub synced_at: Option<i64>,
    /// Last remote version acknowledged for this record; sent as
    /// `expected_version` on push so the remote can detect staleness
    pub remote_version: Option<i64>,
}

impl Record {
    /// Create a fresh, never-synced record
    #[must_use]
    pub fn new(table_name: impl Into<String>, id: RecordId, payload: Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            table_name: table_name.into(),
            payload,
            created_at: now,
            updated_at: now,
            is_dirty: true,
            synced_at: None,
            remote_version: None,
        }
    }
}
