//! Clipboard Error Types
//!
//! Error taxonomy for the clipboard redirection core, plus the recovery
//! policy the session and monitor apply to each class of failure.

use std::time::Duration;
use thiserror::Error;

/// Result type for clipboard operations
pub type Result<T> = std::result::Result<T, ClipboardError>;

/// Clipboard module error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClipboardError {
    /// Native clipboard is held open by another process
    #[error("Native clipboard busy after {attempts} open attempts")]
    ResourceBusy {
        /// Number of open attempts made before giving up
        attempts: u32,
    },

    /// No render reply arrived within the bound
    #[error("Render of format {format_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Format that was being rendered
        format_id: u32,
        /// Bound that elapsed
        timeout_ms: u64,
    },

    /// Virtual channel is gone
    #[error("Clipboard channel closed")]
    ChannelClosed,

    /// Inbound PDU could not be parsed
    #[error("Malformed clipboard PDU: {0}")]
    ProtocolMalformed(String),

    /// Render request invalidated by a newer remote format list
    #[error("Render of format {0} superseded by a newer format list")]
    Superseded(u32),

    /// Remote answered a data request with a failure response
    #[error("Remote failed to render format {0}")]
    RemoteFailure(u32),

    /// Payload exceeds the configured limit
    #[error("Data size {0} exceeds maximum allowed {1}")]
    DataSizeExceeded(usize, usize),

    /// Format is not part of the relevant format list
    #[error("Unknown format ID: {0}")]
    UnknownFormat(u32),

    /// Native clipboard call failed
    #[error("Native clipboard error: {0}")]
    Native(String),

    /// Invalid data structure
    #[error("Invalid data structure: {0}")]
    InvalidData(String),

    /// Invalid UTF-16 data
    #[error("Invalid UTF-16 data")]
    InvalidUtf16,

    /// Listener is not in a state that allows the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Error classification for recovery strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Native clipboard contention
    Contention,
    /// Render reply missing or refused
    Render,
    /// Transport failure
    Channel,
    /// Wire data could not be understood
    Protocol,
    /// Local native failure
    Native,
    /// State errors
    State,
}

/// Classify error for recovery strategy selection
pub fn classify_error(error: &ClipboardError) -> ErrorType {
    match error {
        ClipboardError::ResourceBusy { .. } => ErrorType::Contention,

        ClipboardError::Timeout { .. }
        | ClipboardError::Superseded(_)
        | ClipboardError::RemoteFailure(_)
        | ClipboardError::UnknownFormat(_) => ErrorType::Render,

        ClipboardError::ChannelClosed => ErrorType::Channel,

        ClipboardError::ProtocolMalformed(_)
        | ClipboardError::DataSizeExceeded(_, _)
        | ClipboardError::InvalidData(_)
        | ClipboardError::InvalidUtf16 => ErrorType::Protocol,

        ClipboardError::Native(_) => ErrorType::Native,

        ClipboardError::InvalidState(_) => ErrorType::State,
    }
}

/// Recovery action to take after error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Retry the operation with backoff
    Retry(RetryConfig),

    /// Hand an empty buffer to the OS and carry on
    ReturnEmpty,

    /// Drop the offending message, keep the session
    Discard,

    /// Fail pending work and tear the session down
    TearDown,

    /// Log and give up on this operation only
    Skip,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: u32,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 10,
            backoff_multiplier: 2,
            max_delay_ms: 200,
        }
    }
}

impl RetryConfig {
    /// Calculate delay after the given (zero-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = (self.backoff_multiplier as u64).saturating_pow(attempt);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Determine recovery action for error
///
/// `attempt` is the number of times the failing operation has already been
/// retried; only contention is ever retried.
pub fn recovery_action(error: &ClipboardError, attempt: u32, retry: &RetryConfig) -> RecoveryAction {
    match classify_error(error) {
        ErrorType::Contention => {
            if attempt + 1 < retry.max_attempts {
                RecoveryAction::Retry(retry.clone())
            } else {
                RecoveryAction::Skip
            }
        }
        ErrorType::Render => RecoveryAction::ReturnEmpty,
        ErrorType::Channel => RecoveryAction::TearDown,
        ErrorType::Protocol => RecoveryAction::Discard,
        ErrorType::Native | ErrorType::State => RecoveryAction::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let error = ClipboardError::ResourceBusy { attempts: 3 };
        assert_eq!(classify_error(&error), ErrorType::Contention);

        let error = ClipboardError::Timeout {
            format_id: 13,
            timeout_ms: 100,
        };
        assert_eq!(classify_error(&error), ErrorType::Render);

        assert_eq!(classify_error(&ClipboardError::ChannelClosed), ErrorType::Channel);

        let error = ClipboardError::ProtocolMalformed("short header".to_string());
        assert_eq!(classify_error(&error), ErrorType::Protocol);

        assert_eq!(classify_error(&ClipboardError::InvalidUtf16), ErrorType::Protocol);
    }

    #[test]
    fn test_retry_config() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_for_attempt(0).as_millis(), 10);
        assert_eq!(config.delay_for_attempt(1).as_millis(), 20);
        assert_eq!(config.delay_for_attempt(2).as_millis(), 40);

        // Should cap at max_delay_ms
        assert_eq!(config.delay_for_attempt(10).as_millis(), 200);
        assert_eq!(config.delay_for_attempt(64).as_millis(), 200);
    }

    #[test]
    fn test_recovery_action_busy_retries_then_skips() {
        let error = ClipboardError::ResourceBusy { attempts: 1 };
        let retry = RetryConfig::default();

        match recovery_action(&error, 0, &retry) {
            RecoveryAction::Retry(_) => {}
            other => panic!("Expected Retry action, got {:?}", other),
        }

        assert_eq!(recovery_action(&error, 4, &retry), RecoveryAction::Skip);
    }

    #[test]
    fn test_recovery_action_per_taxonomy() {
        let retry = RetryConfig::default();

        let timeout = ClipboardError::Timeout {
            format_id: 1,
            timeout_ms: 10,
        };
        assert_eq!(recovery_action(&timeout, 0, &retry), RecoveryAction::ReturnEmpty);
        assert_eq!(
            recovery_action(&ClipboardError::ChannelClosed, 0, &retry),
            RecoveryAction::TearDown
        );
        assert_eq!(
            recovery_action(&ClipboardError::ProtocolMalformed("x".into()), 0, &retry),
            RecoveryAction::Discard
        );
        assert_eq!(
            recovery_action(&ClipboardError::Native("x".into()), 0, &retry),
            RecoveryAction::Skip
        );
    }
}
