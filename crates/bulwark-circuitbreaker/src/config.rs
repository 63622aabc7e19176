use crate::error::ConfigError;
use crate::events::{CallOutcome, CircuitBreakerEvent};
use crate::{CircuitBreaker, CircuitState};
use bulwark_core::{EventListeners, FnListener};
use std::time::Duration;

/// Configuration for one circuit breaker.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub(crate) failure_threshold: u32,
    pub(crate) rolling_window: Duration,
    pub(crate) reset_timeout: Duration,
    pub(crate) half_open_success_threshold: u32,
    pub(crate) half_open_max_calls: u32,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
    pub(crate) name: String,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Name of the guarded operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consecutive failures that open the circuit.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// How long the circuit stays open before admitting a trial call.
    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Returns a copy of this configuration under a different name.
    ///
    /// Used by the registry to stamp a template onto each operation.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let mut config = self.clone();
        config.name = name.into();
        config
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfigBuilder::new().into_config()
    }
}

/// Builder for configuring and constructing a circuit breaker.
#[derive(Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u32,
    rolling_window: Duration,
    reset_timeout: Duration,
    half_open_success_threshold: u32,
    half_open_max_calls: Option<u32>,
    event_listeners: EventListeners<CircuitBreakerEvent>,
    name: String,
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            rolling_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
            half_open_max_calls: None,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Sets how many consecutive failures open the circuit.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Sets the rolling window for the failure streak.
    ///
    /// A failure arriving more than this long after the first failure of the
    /// current streak starts a new streak.
    ///
    /// Default: 60 seconds
    pub fn rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    /// Sets how long the circuit stays open before the next call is admitted
    /// as a half-open trial.
    ///
    /// Default: 30 seconds
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets how many successful trial calls close a half-open circuit.
    ///
    /// Default: 2
    pub fn half_open_success_threshold(mut self, n: u32) -> Self {
        self.half_open_success_threshold = n;
        self
    }

    /// Sets how many trial calls may be in flight while half-open.
    ///
    /// Default: same as `half_open_success_threshold`
    pub fn half_open_max_calls(mut self, n: u32) -> Self {
        self.half_open_max_calls = Some(n);
        self
    }

    /// Names the guarded operation, e.g. `"sessions.distributed"`.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, n: N) -> Self {
        self.name = n.into();
        self
    }

    /// Registers a callback for state transitions.
    ///
    /// The callback receives the state transitioned **from** and **to**.
    /// It runs after the breaker lock is released, so it may inspect the
    /// breaker freely.
    ///
    /// ```rust
    /// use bulwark_circuitbreaker::{CircuitBreakerConfig, CircuitState};
    ///
    /// let breaker = CircuitBreakerConfig::builder()
    ///     .name("db.query")
    ///     .on_state_transition(|from, to| {
    ///         if to == CircuitState::Open {
    ///             eprintln!("db.query degraded ({:?} -> {:?})", from, to);
    ///         }
    ///     })
    ///     .build();
    /// # let _ = breaker;
    /// ```
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::Transitioned { from, to, .. } = event {
                    f(*from, *to);
                }
            }));
        self
    }

    /// Registers a callback for calls rejected by an open circuit.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if matches!(event, CircuitBreakerEvent::ShortCircuited { .. }) {
                    f();
                }
            }));
        self
    }

    /// Registers a callback for recorded failures, with the state they were
    /// recorded in.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::Recorded {
                    state,
                    outcome: CallOutcome::Failure,
                    ..
                } = event
                {
                    f(*state);
                }
            }));
        self
    }

    /// Checks the configuration without building it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::new("failure_threshold must be at least 1"));
        }
        if self.half_open_success_threshold == 0 {
            return Err(ConfigError::new(
                "half_open_success_threshold must be at least 1",
            ));
        }
        if self.half_open_max_calls == Some(0) {
            return Err(ConfigError::new("half_open_max_calls must be at least 1"));
        }
        if self.rolling_window.is_zero() {
            return Err(ConfigError::new("rolling_window must be non-zero"));
        }
        Ok(())
    }

    /// Finishes the builder into a plain configuration.
    pub fn into_config(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            rolling_window: self.rolling_window,
            reset_timeout: self.reset_timeout,
            half_open_success_threshold: self.half_open_success_threshold,
            half_open_max_calls: self
                .half_open_max_calls
                .unwrap_or(self.half_open_success_threshold),
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }

    /// Builds the circuit breaker, rejecting invalid configuration.
    pub fn try_build(self) -> Result<CircuitBreaker, ConfigError> {
        self.validate()?;
        Ok(CircuitBreaker::new(self.into_config()))
    }

    /// Builds the circuit breaker.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid; see [`Self::try_build`].
    pub fn build(self) -> CircuitBreaker {
        match self.try_build() {
            Ok(breaker) => breaker,
            Err(err) => panic!("invalid circuit breaker configuration: {}", err),
        }
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
