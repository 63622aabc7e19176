//! Error types for the connection pool.

use bulwark_core::ResilienceError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`ConnectionPool`](crate::ConnectionPool).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No connection became available within the acquire timeout.
    #[error("pool '{pool}' exhausted: {max_size} connections in use after waiting {waited:?}")]
    Exhausted {
        /// Pool name.
        pool: String,
        /// Configured maximum size.
        max_size: usize,
        /// How long the caller waited.
        waited: Duration,
    },
    /// A connection failed validation. Handled inside the pool by replacing
    /// the connection; never returned from `acquire`.
    #[error("connection failed validation: {0}")]
    Validation(String),
    /// A new connection could not be opened.
    #[error("pool '{pool}' could not connect: {reason}")]
    Connect {
        /// Pool name.
        pool: String,
        /// What the manager reported.
        reason: String,
    },
    /// The pool's breaker is open; the resource was not contacted.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),
    /// The pool has been closed.
    #[error("pool '{0}' is closed")]
    Closed(String),
}

impl PoolError {
    /// Returns true for [`PoolError::Exhausted`].
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }
}

impl<E> From<PoolError> for ResilienceError<E> {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted {
                max_size, waited, ..
            } => ResilienceError::PoolExhausted { max_size, waited },
            PoolError::CircuitOpen(name) => ResilienceError::CircuitOpen { name: Some(name) },
            PoolError::Connect { pool, reason } => ResilienceError::ResourceUnavailable {
                resource: pool,
                reason,
            },
            PoolError::Validation(reason) => ResilienceError::ResourceUnavailable {
                resource: String::from("pool"),
                reason,
            },
            PoolError::Closed(pool) => ResilienceError::ResourceUnavailable {
                resource: pool,
                reason: String::from("pool closed"),
            },
        }
    }
}

/// Invalid pool configuration.
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
