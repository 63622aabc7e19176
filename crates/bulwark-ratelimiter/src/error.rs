use bulwark_core::ResilienceError;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Errors returned by the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimiterError {
    /// The key's budget is exhausted.
    #[error("rate limit exceeded for '{key}', retry after {retry_after:?}")]
    RateLimitExceeded {
        /// The key that was checked.
        key: String,
        /// How long until the request could succeed.
        retry_after: Duration,
        /// Wall-clock time at which the request could succeed.
        reset_at: SystemTime,
    },
}

impl RateLimiterError {
    /// How long the caller should wait before retrying.
    pub fn retry_after(&self) -> Duration {
        match self {
            RateLimiterError::RateLimitExceeded { retry_after, .. } => *retry_after,
        }
    }
}

impl<E> From<RateLimiterError> for ResilienceError<E> {
    fn from(err: RateLimiterError) -> Self {
        ResilienceError::RateLimited {
            retry_after: Some(err.retry_after()),
        }
    }
}

/// Failure of a [`BucketStore`](crate::BucketStore) round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the operation.
    #[error("bucket store unavailable: {0}")]
    Unavailable(String),
    /// The store did not answer within the configured timeout.
    #[error("bucket store timed out after {0:?}")]
    Timeout(Duration),
}

/// Invalid rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
