use bulwark_core::ResilienceError;
use thiserror::Error;

/// Errors returned by a guarded call.
#[derive(Debug, Clone, Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open; the operation was not attempted.
    #[error("circuit '{name}' is open; call not permitted")]
    OpenCircuit {
        /// Name of the guarded operation.
        name: String,
    },

    /// The guarded operation itself failed.
    #[error("guarded operation failed: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns true if the error indicates the circuit is open.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::OpenCircuit { .. })
    }

    /// Returns the inner error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the inner error using a function.
    pub fn map_inner<F, T>(self, f: F) -> CircuitBreakerError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            CircuitBreakerError::OpenCircuit { name } => CircuitBreakerError::OpenCircuit { name },
            CircuitBreakerError::Inner(e) => CircuitBreakerError::Inner(f(e)),
        }
    }
}

impl<E> From<CircuitBreakerError<E>> for ResilienceError<E> {
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::OpenCircuit { name } => {
                ResilienceError::CircuitOpen { name: Some(name) }
            }
            CircuitBreakerError::Inner(e) => ResilienceError::Application(e),
        }
    }
}

/// Invalid circuit breaker configuration.
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
