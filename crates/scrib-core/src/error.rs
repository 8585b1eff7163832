//! Error types for scrib-core

use thiserror::Error;

/// Result type alias using scrib-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scrib-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store I/O failure; fatal to the operation, never retried silently
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {table}/{id}")]
    NotFound {
        /// Logical collection name
        table: String,
        /// Record identifier
        id: String,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Remote call failure that was not absorbed by the retry policy
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl Error {
    pub(crate) fn not_found(table: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        }
    }
}

/// Failure taxonomy for calls against the remote sync collaborator.
///
/// A version mismatch is not an error; it is a [`PushOutcome`] variant
/// handled by the conflict flow.
///
/// [`PushOutcome`]: crate::sync::PushOutcome
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network/timeout/5xx; absorbed by the retry policy
    #[error("Transient network error: {0}")]
    Transient(String),

    /// 4xx the remote will never accept; retrying is pointless
    #[error("Remote validation error: {0}")]
    Validation(String),

    /// Upload-specific; not retryable without user action
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl RemoteError {
    /// Whether the retry policy may requeue the failed operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(RemoteError::Transient("timeout".into()).is_retryable());
        assert!(!RemoteError::Validation("bad payload".into()).is_retryable());
        assert!(!RemoteError::QuotaExceeded("over limit".into()).is_retryable());
    }

    #[test]
    fn not_found_formats_table_and_id() {
        let err = Error::not_found("content_item", "abc");
        assert_eq!(err.to_string(), "Record not found: content_item/abc");
    }
}
