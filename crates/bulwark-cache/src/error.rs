use bulwark_core::ResilienceError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by cache adapters.
///
/// Absence is never an error: a missing key is `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Every tier that could serve the request failed.
    #[error("cache '{cache}' unavailable: {reason}")]
    Unavailable {
        /// Name of the adapter.
        cache: String,
        /// What the last tier reported.
        reason: String,
    },
    /// The remote store reported an error.
    #[error("remote store error: {0}")]
    Remote(String),
    /// The remote store did not answer in time.
    #[error("remote store timed out after {0:?}")]
    Timeout(Duration),
    /// The remote tier's circuit is open; the store was not contacted.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),
}

impl<E> From<CacheError> for ResilienceError<E> {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable { cache, .. } => ResilienceError::CacheUnavailable { cache },
            CacheError::Remote(_) => ResilienceError::CacheUnavailable {
                cache: "remote".to_string(),
            },
            CacheError::Timeout(_) => ResilienceError::Timeout { layer: "cache" },
            CacheError::CircuitOpen(name) => ResilienceError::CircuitOpen { name: Some(name) },
        }
    }
}

/// Invalid cache configuration.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_maps_to_cache_unavailable() {
        let err = CacheError::Unavailable {
            cache: "sessions".to_string(),
            reason: "both tiers down".to_string(),
        };
        let converted: ResilienceError<()> = err.into();
        assert!(converted.is_cache_unavailable());
        assert!(!converted.is_expected());
    }

    #[test]
    fn circuit_open_stays_expected() {
        let converted: ResilienceError<()> =
            CacheError::CircuitOpen("sessions.distributed".to_string()).into();
        assert!(converted.is_circuit_open());
        assert!(converted.is_expected());
    }
}
