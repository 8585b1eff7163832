//! Engine and remote endpoint configuration

use std::time::Duration;

use crate::error::{Error, Result};

/// Default cap on automatic retries per sync record or upload task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default chunk size for binary uploads (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// Tuning knobs for the sync engine and upload queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Automatic retry cap for transient failures
    pub max_retries: u32,
    /// First retry delay; doubles on each subsequent retry
    pub backoff_base: Duration,
    /// Upper bound on the backoff delay
    pub backoff_cap: Duration,
    /// Interval between automatic sync cycles
    pub sync_interval: Duration,
    /// Maximum concurrent binary transfers
    pub upload_concurrency: usize,
    /// How often the upload worker loop re-checks for pending tasks;
    /// a fresh enqueue wakes it immediately
    pub upload_poll_interval: Duration,
    /// Chunk size for resumable uploads, in bytes
    pub chunk_size: u32,
    /// Bound on every push/pull/upload network call
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(5 * 60),
            sync_interval: Duration::from_secs(60),
            upload_concurrency: 3,
            upload_poll_interval: Duration::from_secs(5),
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Set the automatic retry cap
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff schedule (base delay and cap)
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Set the interval between automatic sync cycles
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the maximum number of concurrent binary transfers
    #[must_use]
    pub const fn with_upload_concurrency(mut self, limit: usize) -> Self {
        self.upload_concurrency = limit;
        self
    }

    /// Set the interval between upload worker wake-ups
    #[must_use]
    pub const fn with_upload_poll_interval(mut self, interval: Duration) -> Self {
        self.upload_poll_interval = interval;
        self
    }

    /// Set the upload chunk size in bytes
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the network call timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Connection settings for the remote sync collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the remote service, without trailing slash
    pub endpoint: String,
    /// Optional bearer token
    pub auth_token: Option<String>,
}

impl RemoteConfig {
    /// Create a remote configuration, validating the endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self {
            endpoint: normalize_endpoint(endpoint.into())?,
            auth_token: None,
        })
    }

    /// Attach a bearer token for authenticated calls
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput(
            "endpoint must not be empty".to_string(),
        ));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(RemoteConfig::new("  ").is_err());
        assert!(RemoteConfig::new("api.example.com").is_err());
    }

    #[test]
    fn normalize_endpoint_trims_trailing_slash() {
        let config = RemoteConfig::new("https://sync.example.com/v1/").unwrap();
        assert_eq!(config.endpoint, "https://sync.example.com/v1");
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, Duration::from_secs(5));
        assert_eq!(config.backoff_cap, Duration::from_secs(300));
        assert_eq!(config.upload_concurrency, 3);
    }

    #[test]
    fn builder_methods_override_defaults() {
        let config = EngineConfig::default()
            .with_max_retries(5)
            .with_upload_concurrency(1)
            .with_chunk_size(64 * 1024);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.upload_concurrency, 1);
        assert_eq!(config.chunk_size, 64 * 1024);
    }
}
