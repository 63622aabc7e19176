//! Configuration for single-flight groups.

use std::time::Duration;

/// Configuration for a [`SingleFlight`](crate::SingleFlight) group.
#[derive(Debug, Clone)]
pub struct SingleFlightConfig {
    pub(crate) grace: Duration,
    /// Only used when `metrics` or `tracing` features are enabled.
    #[cfg_attr(not(any(feature = "metrics", feature = "tracing")), allow(dead_code))]
    pub(crate) name: String,
}

impl SingleFlightConfig {
    /// Create a builder for configuration options.
    pub fn builder() -> SingleFlightConfigBuilder {
        SingleFlightConfigBuilder::new()
    }

    /// How long a successful result stays joinable after completion.
    pub fn grace(&self) -> Duration {
        self.grace
    }
}

impl Default for SingleFlightConfig {
    fn default() -> Self {
        SingleFlightConfigBuilder::new().into_config()
    }
}

/// Builder for single-flight configuration.
#[derive(Debug, Clone)]
pub struct SingleFlightConfigBuilder {
    grace: Duration,
    name: String,
}

impl SingleFlightConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            grace: Duration::from_millis(100),
            name: String::from("<unnamed>"),
        }
    }

    /// Set how long a successful result stays installed after completion,
    /// so near-simultaneous late callers share it instead of starting a
    /// fresh computation. Failures are never kept.
    ///
    /// Default: 100 milliseconds
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Set a name for this group (for metrics/tracing).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Finish the builder into a configuration.
    pub fn into_config(self) -> SingleFlightConfig {
        SingleFlightConfig {
            grace: self.grace,
            name: self.name,
        }
    }

    /// Build the single-flight group.
    pub fn build<K, V, E>(self) -> crate::SingleFlight<K, V, E> {
        crate::SingleFlight::with_config(self.into_config())
    }
}

impl Default for SingleFlightConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
