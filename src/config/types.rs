//! Configuration type definitions

use crate::clipboard::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Clipboard redirection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipboardConfig {
    /// Enable clipboard redirection
    pub enabled: bool,

    /// Longest a single remote render may block the OS, in milliseconds
    pub render_timeout_ms: u64,

    /// Attempts to open a clipboard held by another process
    pub open_retry_attempts: u32,

    /// Delay after the first failed open, doubled per attempt
    pub open_retry_delay_ms: u64,

    /// Upper bound for the open retry delay
    pub open_retry_max_delay_ms: u64,

    /// Maximum clipboard payload in bytes
    pub max_data_size: usize,

    /// Bridge file lists through the file descriptor formats
    pub enable_file_lists: bool,

    /// How long a timed-out request may still swallow its late reply
    pub stale_reply_ttl_ms: u64,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            render_timeout_ms: 3000,
            open_retry_attempts: 5,
            open_retry_delay_ms: 10,
            open_retry_max_delay_ms: 200,
            max_data_size: 16 * 1024 * 1024, // 16 MB
            enable_file_lists: true,
            stale_reply_ttl_ms: 30_000,
        }
    }
}

impl ClipboardConfig {
    /// Render bound as a duration
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Stale reply window as a duration
    pub fn stale_reply_ttl(&self) -> Duration {
        Duration::from_millis(self.stale_reply_ttl_ms)
    }

    /// Backoff policy for contended clipboard opens
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.open_retry_attempts,
            initial_delay_ms: self.open_retry_delay_ms,
            backoff_multiplier: 2,
            max_delay_ms: self.open_retry_max_delay_ms,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Output format ("pretty", "compact", "json")
    pub format: String,

    /// Directory for log files (None = console only)
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}
