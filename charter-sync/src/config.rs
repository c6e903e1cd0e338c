//! Sync configuration.
//!
//! Hosts usually deserialize this from their app config; every field except
//! the backend credentials has a default.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage key the queue is persisted under.
pub const DEFAULT_STORAGE_KEY: &str = "charter.crm_event_queue";

/// Configuration for the sync core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the CRM proxy (e.g. `https://api.example.com/functions/v1`).
    pub backend_base_url: String,
    /// Bearer key sent to the CRM proxy.
    pub backend_key: String,
    /// Hard switch. When false every operation is a no-op.
    pub enabled: bool,
    /// A failed item moves to the failed set once its retry count exceeds this.
    pub max_retries: u32,
    /// Base delay between attempts of a failed item (ms). 0 retries on every pass.
    pub retry_base_delay_ms: u64,
    /// Upper bound for the retry delay (ms).
    pub retry_max_delay_ms: u64,
    /// Interval between background replay passes while online.
    pub sync_interval_secs: u64,
    /// Interval between status republications.
    pub status_interval_secs: u64,
    /// How long a resolved contact id stays cached.
    pub contact_cache_ttl_secs: u64,
    /// Key the queue is persisted under in the durable store.
    pub storage_key: String,
    /// Per-request timeout for the HTTP backend.
    pub request_timeout_secs: u64,
    /// Client platform stamped on event metadata.
    pub platform: Option<String>,
    /// App version stamped on event metadata.
    pub app_version: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_base_url: String::new(),
            backend_key: String::new(),
            enabled: true,
            max_retries: 5,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 5 * 60 * 1000,
            sync_interval_secs: 30,
            status_interval_secs: 10,
            contact_cache_ttl_secs: 5 * 60,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            request_timeout_secs: 30,
            platform: None,
            app_version: None,
        }
    }
}

impl SyncConfig {
    /// Creates an enabled config pointing at the given backend.
    pub fn new(backend_base_url: impl Into<String>, backend_key: impl Into<String>) -> Self {
        Self {
            backend_base_url: backend_base_url.into(),
            backend_key: backend_key.into(),
            ..Default::default()
        }
    }

    /// Creates a config with sync switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Checks that an enabled config can talk to a backend.
    ///
    /// A disabled config is always valid.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.backend_base_url.trim().is_empty() {
            return Err(SyncError::Config("backend_base_url is empty".to_string()));
        }
        if self.backend_key.trim().is_empty() {
            return Err(SyncError::Config("backend_key is empty".to_string()));
        }
        if self.storage_key.is_empty() {
            return Err(SyncError::Config("storage_key is empty".to_string()));
        }
        if self.sync_interval_secs == 0 || self.status_interval_secs == 0 {
            return Err(SyncError::Config("intervals must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn contact_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.contact_cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy derived from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

/// Bounds on redelivery of failed queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// An item is moved to the failed set once `retry_count > max_retries`.
    pub max_retries: u32,
    /// Delay after the first failure; doubles with every further failure.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before attempting an item that has failed `retry_count` times.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry_count - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Returns true once an item with this retry count belongs in the failed set.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.max_retries
    }
}
