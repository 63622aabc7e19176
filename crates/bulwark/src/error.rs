use thiserror::Error;

/// Settings that cannot be turned into running components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// The document could not be parsed.
    #[error("failed to parse settings: {0}")]
    Parse(String),

    /// A section failed a facade-level check.
    #[error("invalid {section} settings: {message}")]
    Invalid {
        /// The offending section.
        section: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The cache configuration was rejected.
    #[error("cache: {0}")]
    Cache(#[from] bulwark_cache::ConfigError),

    /// The rate limiter configuration was rejected.
    #[error("rate limiter: {0}")]
    RateLimiter(#[from] bulwark_ratelimiter::ConfigError),

    /// The breaker template was rejected.
    #[error("circuit breaker: {0}")]
    CircuitBreaker(#[from] bulwark_circuitbreaker::ConfigError),

    /// The pool configuration was rejected.
    #[error("pool: {0}")]
    Pool(#[from] bulwark_pool::ConfigError),
}

impl SettingsError {
    pub(crate) fn invalid(section: &'static str, message: impl Into<String>) -> Self {
        SettingsError::Invalid {
            section,
            message: message.into(),
        }
    }
}
