//! Error types for memory limit accounting.
//!
//! Capacity exhaustion is never reported through these types: a full
//! controller blocks in `reserve` or answers `false` from `try_reserve`.
//! Every error here is raised before the controller mutates any state.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by the memory limit controller and its configuration.
#[derive(Debug, Error)]
pub enum LimitError {
    /// A size argument was rejected before any state change.
    #[error("Invalid argument to {operation}: {reason}")]
    InvalidArgument {
        /// The operation that rejected the argument.
        operation: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A blocked reservation was cancelled before it was admitted.
    #[error("Reservation of {size} bytes cancelled while waiting for capacity")]
    Cancelled {
        /// The size that was being reserved.
        size: u64,
    },

    /// A bounded reservation gave up waiting for capacity.
    #[error("Reservation of {size} bytes timed out after {timeout:?}")]
    TimedOut {
        /// The size that was being reserved.
        size: u64,
        /// How long the caller was willing to wait.
        timeout: Duration,
    },

    /// Configuration error.
    #[error("Invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// IO error reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML configuration.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl LimitError {
    /// Build a [`LimitError::InvalidArgument`] for `operation`.
    pub fn invalid_argument(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation,
            reason: reason.into(),
        }
    }

    /// Whether this is the cancellation outcome rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether this error rejected an argument.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

/// Result type for memory limit operations.
pub type LimitResult<T> = std::result::Result<T, LimitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = LimitError::invalid_argument("release", "size must be non-negative, got -1");
        assert!(err.is_invalid_argument());
        assert!(!err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "Invalid argument to release: size must be non-negative, got -1"
        );
    }

    #[test]
    fn test_cancelled_is_distinct() {
        let err = LimitError::Cancelled { size: 8 };
        assert!(err.is_cancelled());
        assert!(!err.is_invalid_argument());
    }
}
