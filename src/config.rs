// Configuration module for the consumer core
//
// Settings are plain fields with defaults from `consumer::constants`.
// `validate()` checks bounds before the background thread is started.

use crate::consumer::constants::{
    DEFAULT_API_TIMEOUT_MS, DEFAULT_AUTO_COMMIT_INTERVAL_MS, DEFAULT_CLIENT_ID,
    DEFAULT_CLOSE_TIMEOUT_MS, DEFAULT_MAX_POLL_WAIT_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_RETRY_BACKOFF_MS, MAX_MAX_POLL_WAIT_MS, MIN_MAX_POLL_WAIT_MS, MIN_REQUEST_TIMEOUT_MS,
};
use crate::consumer::error::{ConsumerError, Result};
use crate::consumer::types::{IsolationLevel, OffsetResetStrategy};

/// Configuration struct holding all consumer settings
#[derive(Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub client_id: String,
    /// Consumer group; `None` disables group membership and commits
    pub group_id: Option<String>,
    pub enable_auto_commit: bool,
    /// Interval between auto-commits (milliseconds)
    pub auto_commit_interval_ms: i64,
    /// Timeout for blocking API calls without an explicit timeout (milliseconds)
    pub default_api_timeout_ms: i64,
    pub request_timeout_ms: i64,
    /// Longest the background thread sleeps between iterations (milliseconds)
    pub max_poll_wait_ms: i64,
    pub retry_backoff_ms: i64,
    /// Reset strategy for partitions without a committed offset
    pub auto_offset_reset: OffsetResetStrategy,
    pub isolation_level: IsolationLevel,
    /// Budget for `close()` without an explicit timeout (milliseconds)
    pub close_timeout_ms: i64,
}

impl std::fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("client_id", &self.client_id)
            .field("group_id", &self.group_id.as_deref().unwrap_or("<none>"))
            .field("enable_auto_commit", &self.enable_auto_commit)
            .field("auto_commit_interval_ms", &self.auto_commit_interval_ms)
            .field("default_api_timeout_ms", &self.default_api_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_poll_wait_ms", &self.max_poll_wait_ms)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("auto_offset_reset", &self.auto_offset_reset.as_str())
            .field("isolation_level", &self.isolation_level)
            .field("close_timeout_ms", &self.close_timeout_ms)
            .finish()
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            group_id: None,
            enable_auto_commit: true,
            auto_commit_interval_ms: DEFAULT_AUTO_COMMIT_INTERVAL_MS,
            default_api_timeout_ms: DEFAULT_API_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_poll_wait_ms: DEFAULT_MAX_POLL_WAIT_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            auto_offset_reset: OffsetResetStrategy::default(),
            isolation_level: IsolationLevel::default(),
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
        }
    }
}

impl ConsumerConfig {
    /// Defaults for a member of `group_id`
    pub fn for_group(group_id: impl Into<String>) -> Self {
        ConsumerConfig {
            group_id: Some(group_id.into()),
            ..Default::default()
        }
    }

    /// True if the consumer takes part in a group
    pub fn has_group(&self) -> bool {
        self.group_id.is_some()
    }

    /// Auto-commit only applies to group members
    pub fn auto_commit_enabled(&self) -> bool {
        self.enable_auto_commit && self.has_group()
    }

    /// Check every setting against its bounds
    pub fn validate(&self) -> Result<()> {
        if let Some(group_id) = &self.group_id {
            if group_id.trim().is_empty() {
                return Err(invalid("group_id must not be blank"));
            }
        }
        if self.enable_auto_commit && self.auto_commit_interval_ms <= 0 {
            return Err(invalid(format!(
                "auto_commit_interval_ms must be positive, got {}",
                self.auto_commit_interval_ms
            )));
        }
        if self.default_api_timeout_ms < 0 {
            return Err(invalid(format!(
                "default_api_timeout_ms must not be negative, got {}",
                self.default_api_timeout_ms
            )));
        }
        if self.request_timeout_ms < MIN_REQUEST_TIMEOUT_MS {
            return Err(invalid(format!(
                "request_timeout_ms must be at least {}, got {}",
                MIN_REQUEST_TIMEOUT_MS, self.request_timeout_ms
            )));
        }
        if !(MIN_MAX_POLL_WAIT_MS..=MAX_MAX_POLL_WAIT_MS).contains(&self.max_poll_wait_ms) {
            return Err(invalid(format!(
                "max_poll_wait_ms must be between {} and {}, got {}",
                MIN_MAX_POLL_WAIT_MS, MAX_MAX_POLL_WAIT_MS, self.max_poll_wait_ms
            )));
        }
        if self.retry_backoff_ms < 0 {
            return Err(invalid(format!(
                "retry_backoff_ms must not be negative, got {}",
                self.retry_backoff_ms
            )));
        }
        if self.close_timeout_ms < 0 {
            return Err(invalid(format!(
                "close_timeout_ms must not be negative, got {}",
                self.close_timeout_ms
            )));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConsumerError {
    ConsumerError::InvalidConfig(message.into())
}
