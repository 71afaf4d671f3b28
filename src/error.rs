//! # Batch Engine Error Types
//!
//! Structured error handling for the batch engine using thiserror.
//!
//! Every error here is recovered at the nearest boundary: a rejected submission fails
//! only the offending caller, and a failed batch fans out into one error per request so
//! every waiting caller of that group key returns instead of hanging.

use thiserror::Error;

use crate::config::ConfigurationError;

/// Errors surfaced to callers of the batch engine
///
/// `Clone` is required because a single handler failure is delivered to every caller
/// whose request was part of the failed batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// Submission after `stop()`, or a claim that can no longer be satisfied because
    /// the dispatch worker has drained and exited
    #[error("Batch engine is stopped")]
    EngineStopped,

    /// The group key function rejected the request
    #[error("Group key function rejected request: {message}")]
    GroupKey { message: String },

    /// The batch handler returned an error for the batch this request belonged to
    #[error("Batch handler failed for group {group_key} ({batch_size} requests): {message}")]
    Handler {
        group_key: String,
        batch_size: usize,
        message: String,
    },

    /// The batch handler panicked while processing the batch
    #[error("Batch handler panicked for group {group_key} ({batch_size} requests): {message}")]
    HandlerPanicked {
        group_key: String,
        batch_size: usize,
        message: String,
    },

    /// The batch handler returned a different number of results than it was given requests
    #[error("Batch handler returned {actual} results for {expected} requests in group {group_key}")]
    ResultCountMismatch {
        group_key: String,
        expected: usize,
        actual: usize,
    },

    /// The caller's deadline elapsed before a result was available
    #[error("Timed out after {waited_ms}ms waiting for batch result")]
    Timeout { waited_ms: u64 },

    /// The caller's cancellation signal fired before a result was available
    #[error("Batch request cancelled by caller")]
    Cancelled,

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BatchError {
    /// Create a group key rejection error
    pub fn group_key(message: impl Into<String>) -> Self {
        Self::GroupKey {
            message: message.into(),
        }
    }

    /// Create a handler failure error
    pub fn handler(group_key: impl Into<String>, batch_size: usize, message: impl Into<String>) -> Self {
        Self::Handler {
            group_key: group_key.into(),
            batch_size,
            message: message.into(),
        }
    }

    /// Create a handler panic error
    pub fn handler_panicked(
        group_key: impl Into<String>,
        batch_size: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::HandlerPanicked {
            group_key: group_key.into(),
            batch_size,
            message: message.into(),
        }
    }

    /// Create a result count mismatch error
    pub fn result_count_mismatch(group_key: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ResultCountMismatch {
            group_key: group_key.into(),
            expected,
            actual,
        }
    }

    /// Whether this error was produced by the batch (handler side) rather than by the
    /// caller's own request lifecycle
    pub fn is_batch_failure(&self) -> bool {
        matches!(
            self,
            Self::Handler { .. } | Self::HandlerPanicked { .. } | Self::ResultCountMismatch { .. }
        )
    }

    /// Whether resubmitting a fresh request could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Handler { .. }
                | Self::HandlerPanicked { .. }
                | Self::Timeout { .. }
                | Self::Cancelled
        )
    }
}

impl From<ConfigurationError> for BatchError {
    fn from(error: ConfigurationError) -> Self {
        BatchError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
