//! Common error taxonomy for bulwark components.
//!
//! Each component crate has its own error enum (`CacheError`,
//! `CircuitBreakerError`, `RateLimiterError`, `PoolError`). All of them convert
//! into [`ResilienceError<E>`], so a caller stacking several components can use
//! one error type and still tell expected control-flow outcomes (an open
//! circuit, an exhausted rate budget) apart from genuine infrastructure faults.
//!
//! ```rust
//! use bulwark_core::ResilienceError;
//! use std::time::Duration;
//!
//! fn respond(err: ResilienceError<std::io::Error>) -> u16 {
//!     match err {
//!         ResilienceError::RateLimited { .. } => 429,
//!         ResilienceError::CircuitOpen { .. } | ResilienceError::CacheUnavailable { .. } => 503,
//!         ResilienceError::PoolExhausted { .. } | ResilienceError::Timeout { .. } => 504,
//!         ResilienceError::ResourceUnavailable { .. } => 502,
//!         ResilienceError::Application(_) => 500,
//!     }
//! }
//!
//! let err: ResilienceError<std::io::Error> = ResilienceError::RateLimited {
//!     retry_after: Some(Duration::from_secs(1)),
//! };
//! assert!(err.is_expected());
//! assert_eq!(respond(err), 429);
//! ```

use std::fmt;
use std::time::Duration;

/// A common error type that wraps every bulwark component error.
///
/// # Type Parameters
///
/// - `E`: The application-specific error type produced by the guarded
///   operation (the loader, the backing resource client, ...).
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// An operation did not finish within its timeout.
    Timeout {
        /// The layer that timed out (e.g., "distributed_cache", "rate_limiter")
        layer: &'static str,
    },

    /// Circuit breaker is open; the operation was rejected without an attempt.
    CircuitOpen {
        /// Circuit breaker name (operation name), if known
        name: Option<String>,
    },

    /// Admission was denied by the rate limiter.
    RateLimited {
        /// How long to wait before retrying (if known)
        retry_after: Option<Duration>,
    },

    /// No pooled connection became available within the acquire timeout.
    PoolExhausted {
        /// Configured maximum pool size
        max_size: usize,
        /// How long the caller waited
        waited: Duration,
    },

    /// Every cache tier failed.
    CacheUnavailable {
        /// Name of the cache that failed
        cache: String,
    },

    /// A backing resource could not be reached (connect or validation
    /// failure after the pool's single replacement attempt).
    ResourceUnavailable {
        /// Name of the pool or resource
        resource: String,
        /// What the resource reported
        reason: String,
    },

    /// The guarded operation itself returned an error.
    Application(E),
}

impl<E> fmt::Display for ResilienceError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResilienceError::Timeout { layer } => write!(f, "Timeout in {}", layer),
            ResilienceError::CircuitOpen { name } => match name {
                Some(n) => write!(f, "Circuit breaker '{}' is open", n),
                None => write!(f, "Circuit breaker is open"),
            },
            ResilienceError::RateLimited { retry_after } => match retry_after {
                Some(d) => write!(f, "Rate limited, retry after {:?}", d),
                None => write!(f, "Rate limited"),
            },
            ResilienceError::PoolExhausted { max_size, waited } => write!(
                f,
                "Connection pool exhausted ({} connections) after waiting {:?}",
                max_size, waited
            ),
            ResilienceError::CacheUnavailable { cache } => {
                write!(f, "Cache '{}' unavailable on all tiers", cache)
            }
            ResilienceError::ResourceUnavailable { resource, reason } => {
                write!(f, "Resource '{}' unavailable: {}", resource, reason)
            }
            ResilienceError::Application(e) => write!(f, "Application error: {}", e),
        }
    }
}

impl<E> std::error::Error for ResilienceError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResilienceError::Application(e) => Some(e),
            _ => None,
        }
    }
}

// From implementations for each component error live in the component
// crates to avoid circular dependencies.

impl<E> ResilienceError<E> {
    /// Returns `true` if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResilienceError::Timeout { .. })
    }

    /// Returns `true` if the circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    /// Returns `true` if the rate limiter denied admission.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ResilienceError::RateLimited { .. })
    }

    /// Returns `true` if the connection pool had no connection to hand out.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, ResilienceError::PoolExhausted { .. })
    }

    /// Returns `true` if every cache tier failed.
    pub fn is_cache_unavailable(&self) -> bool {
        matches!(self, ResilienceError::CacheUnavailable { .. })
    }

    /// Returns `true` if this is an application error.
    pub fn is_application(&self) -> bool {
        matches!(self, ResilienceError::Application(_))
    }

    /// Returns `true` for expected control-flow outcomes: an open circuit or
    /// a denied rate-limit check. These are not infrastructure faults.
    pub fn is_expected(&self) -> bool {
        self.is_circuit_open() || self.is_rate_limited()
    }

    /// Returns `true` when the caller may retry later.
    ///
    /// Bulwark never retries on the caller's behalf; this only classifies.
    pub fn is_retryable(&self) -> bool {
        !self.is_application()
    }

    /// Returns the suggested wait before retrying, when one is known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Extracts the application error, if this is an `Application` variant.
    pub fn application_error(self) -> Option<E> {
        match self {
            ResilienceError::Application(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the application error using a function.
    ///
    /// ```
    /// use bulwark_core::ResilienceError;
    ///
    /// let err: ResilienceError<String> = ResilienceError::Application("error".to_string());
    /// let mapped: ResilienceError<usize> = err.map_application(|s| s.len());
    /// assert_eq!(mapped.application_error(), Some(5));
    /// ```
    pub fn map_application<F, T>(self, f: F) -> ResilienceError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            ResilienceError::Timeout { layer } => ResilienceError::Timeout { layer },
            ResilienceError::CircuitOpen { name } => ResilienceError::CircuitOpen { name },
            ResilienceError::RateLimited { retry_after } => {
                ResilienceError::RateLimited { retry_after }
            }
            ResilienceError::PoolExhausted { max_size, waited } => {
                ResilienceError::PoolExhausted { max_size, waited }
            }
            ResilienceError::CacheUnavailable { cache } => {
                ResilienceError::CacheUnavailable { cache }
            }
            ResilienceError::ResourceUnavailable { resource, reason } => {
                ResilienceError::ResourceUnavailable { resource, reason }
            }
            ResilienceError::Application(e) => ResilienceError::Application(f(e)),
        }
    }
}
