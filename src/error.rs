//! Error types for the throttler.

use thiserror::Error;

/// Main error type for throttler operations.
#[derive(Error, Debug)]
pub enum ThrottlerError {
    /// The request exceeded at least one configured rate rule.
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimitExceeded {
        /// Seconds until the longest exceeded window resets
        retry_after: u64,
    },

    /// The counter store could not complete an operation
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottlerError {
    /// Whether this error is a rate limit denial rather than a fault.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ThrottlerError::RateLimitExceeded { .. })
    }

    /// The retry-after value carried by a denial.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ThrottlerError::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for ThrottlerError {
    fn from(err: redis::RedisError) -> Self {
        ThrottlerError::StoreUnavailable(format!("redis: {}", err))
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for ThrottlerError {
    fn from(err: mongodb::error::Error) -> Self {
        ThrottlerError::StoreUnavailable(format!("mongodb: {}", err))
    }
}

/// Result type alias for throttler operations.
pub type Result<T> = std::result::Result<T, ThrottlerError>;
