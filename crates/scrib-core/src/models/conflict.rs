//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::models::ResolutionStrategy;

/// Lifecycle state of a materialized conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

impl ConflictStatus {
    /// Database text encoding
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict status: {other}"
            ))),
        }
    }
}

/// Divergence between the local and remote version of one record.
///
/// Materialized by the sync engine during push/pull reconciliation;
/// resolved rows are kept for audit rather than deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Queue entry that hit the conflict, when one exists
    pub sync_record_id: Option<i64>,
    /// Logical collection of the record
    pub table_name: String,
    /// Record identifier
    pub record_id: String,
    /// Full local snapshot (`Value::Null` for a local delete tombstone)
    pub local_data: Value,
    /// Full remote snapshot (`Value::Null` for a remote deletion)
    pub remote_data: Value,
    /// Top-level payload keys whose values differ
    pub conflict_fields: Vec<String>,
    /// Local mutation timestamp (Unix ms)
    pub local_updated_at: i64,
    /// Remote mutation timestamp (Unix ms)
    pub remote_updated_at: i64,
    /// Remote version at detection time
    pub remote_version: i64,
    /// Pending or resolved
    pub status: ConflictStatus,
    /// Strategy applied at resolution time
    pub resolution: Option<ResolutionStrategy>,
    /// Payload the resolution produced, stored for audit
    pub resolved_data: Option<Value>,
    /// Detection timestamp (Unix ms)
    pub created_at: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_status_round_trips() {
        assert_eq!(
            "pending".parse::<ConflictStatus>().unwrap(),
            ConflictStatus::Pending
        );
        assert_eq!(
            "resolved".parse::<ConflictStatus>().unwrap(),
            ConflictStatus::Resolved
        );
        assert!("open".parse::<ConflictStatus>().is_err());
    }
}
