use crate::error::ConfigError;
use crate::events::{CloseReason, PoolEvent};
use crate::{ConnectionManager, ConnectionPool};
use bulwark_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
use bulwark_core::{EventListeners, FnListener};
use std::time::Duration;

/// Configuration for a [`ConnectionPool`].
#[derive(Clone)]
pub struct PoolConfig {
    pub(crate) name: String,
    pub(crate) min_size: usize,
    pub(crate) max_size: usize,
    pub(crate) acquire_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) validation_interval: Duration,
    pub(crate) idle_timeout: Duration,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) event_listeners: EventListeners<PoolEvent>,
}

impl PoolConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connections kept open even when idle.
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Upper bound on open connections.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// How long `acquire` waits before failing.
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("name", &self.name)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("validation_interval", &self.validation_interval)
            .field("idle_timeout", &self.idle_timeout)
            .field("breaker", &self.breaker.name())
            .finish()
    }
}

/// Builder for [`PoolConfig`].
pub struct PoolConfigBuilder {
    name: String,
    min_size: usize,
    max_size: usize,
    acquire_timeout: Duration,
    connect_timeout: Duration,
    validation_interval: Duration,
    idle_timeout: Duration,
    breaker: Option<CircuitBreaker>,
    event_listeners: EventListeners<PoolEvent>,
}

impl PoolConfigBuilder {
    /// Creates a builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("pool"),
            min_size: 0,
            max_size: 10,
            acquire_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            validation_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            breaker: None,
            event_listeners: EventListeners::new(),
        }
    }

    /// Names the pool. The default breaker is named `<name>.connect`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets how many connections the idle sweep keeps open and
    /// [`ConnectionPool::warm_up`] opens.
    ///
    /// Default: 0
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Sets the maximum number of open connections.
    ///
    /// Default: 10
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets how long `acquire` waits for a free connection.
    ///
    /// Default: 1 second
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the timeout for opening and validating a connection.
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Idle connections unvalidated for longer than this are validated
    /// before being handed out.
    ///
    /// Default: 30 seconds
    pub fn validation_interval(mut self, interval: Duration) -> Self {
        self.validation_interval = interval;
        self
    }

    /// Idle connections unused for longer than this are closed by the sweep.
    ///
    /// Default: 10 minutes
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Uses an existing breaker for connects and validations, typically one
    /// handed out by a `CircuitBreakerRegistry`.
    pub fn breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Registers a callback for opened connections.
    pub fn on_connection_created<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &PoolEvent| {
                if let PoolEvent::ConnectionCreated { total, .. } = event {
                    f(*total);
                }
            }));
        self
    }

    /// Registers a callback for closed connections.
    pub fn on_connection_closed<F>(mut self, f: F) -> Self
    where
        F: Fn(CloseReason) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &PoolEvent| {
                if let PoolEvent::ConnectionClosed { reason, .. } = event {
                    f(*reason);
                }
            }));
        self
    }

    /// Registers a callback for acquire timeouts.
    pub fn on_acquire_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &PoolEvent| {
                if let PoolEvent::AcquireTimedOut { waited, .. } = event {
                    f(*waited);
                }
            }));
        self
    }

    /// Validates and finishes the configuration.
    pub fn into_config(self) -> Result<PoolConfig, ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::new("pool max_size must be at least 1"));
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::new(format!(
                "pool min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(ConfigError::new("pool timeouts must be non-zero"));
        }

        let breaker = self.breaker.unwrap_or_else(|| {
            CircuitBreaker::new(
                CircuitBreakerConfig::default().with_name(format!("{}.connect", self.name)),
            )
        });

        Ok(PoolConfig {
            name: self.name,
            min_size: self.min_size,
            max_size: self.max_size,
            acquire_timeout: self.acquire_timeout,
            connect_timeout: self.connect_timeout,
            validation_interval: self.validation_interval,
            idle_timeout: self.idle_timeout,
            breaker,
            event_listeners: self.event_listeners,
        })
    }

    /// Builds a pool over `manager`.
    pub fn build<M: ConnectionManager>(self, manager: M) -> Result<ConnectionPool<M>, ConfigError> {
        Ok(ConnectionPool::new(manager, self.into_config()?))
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
