//! Error types for the throttling engine.

use std::time::Duration;

use thiserror::Error;

use crate::ratelimit::{DiscriminatingKey, StorageError};

/// Main error type for throttler operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// Invalid registration, invalid override, or a handle that cannot be resolved
    #[error("Configuration error: {0}")]
    Config(String),

    /// The action would push the counter past its threshold
    #[error(transparent)]
    Exceeded(#[from] RateLimitExceeded),

    /// The counter store failed or timed out
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Returns the rejection details if this error is a threshold rejection.
    pub fn as_exceeded(&self) -> Option<&RateLimitExceeded> {
        match self {
            ThrottleError::Exceeded(exceeded) => Some(exceeded),
            _ => None,
        }
    }
}

/// Rejection raised by `throttle` when the threshold would be exceeded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{handle} threshold of {threshold} exceeded for key '{key}'")]
pub struct RateLimitExceeded {
    /// Handle of the limit that rejected the call
    pub handle: String,
    /// Discriminating key the call was made with
    pub key: DiscriminatingKey,
    /// Effective threshold for the call
    pub threshold: u64,
    /// Whole seconds until the next window starts
    pub retry_after: u64,
}

impl RateLimitExceeded {
    /// Time to wait before the next window opens.
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after)
    }
}

/// Result type alias for throttler operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
