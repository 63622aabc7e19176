//! Bounded async connection pool.
//!
//! [`ConnectionPool`] keeps between `min_size` and `max_size` connections
//! to one backing resource, opened and checked by a [`ConnectionManager`].
//!
//! - `acquire` hands out an idle connection, validating it first when it
//!   has not been validated recently; a connection failing validation is
//!   closed and replaced once.
//! - At `max_size`, callers wait up to `acquire_timeout` and then get
//!   [`PoolError::Exhausted`].
//! - Connects and validations run through the pool's own circuit breaker,
//!   independent from any cache breaker.
//! - [`ConnectionPool::sweep_idle`] closes connections idle past
//!   `idle_timeout`, keeping `min_size` open.
//!
//! The pool implements [`HealthCheck`] for use with a
//! `bulwark_healthcheck::HealthAggregator`.

mod config;
mod connection;
mod error;
mod events;
mod manager;
mod pool;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use connection::PooledConnection;
pub use error::{ConfigError, PoolError};
pub use events::{CloseReason, PoolEvent};
pub use manager::ConnectionManager;
pub use pool::{ConnectionPool, EntryState, PoolStats};

use async_trait::async_trait;
use bulwark_healthcheck::{ComponentHealth, HealthCheck};

#[cfg(feature = "metrics")]
static METRICS_INIT: std::sync::Once = std::sync::Once::new();

#[cfg(feature = "metrics")]
pub(crate) fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    METRICS_INIT.call_once(|| {
        describe_gauge!("pool_connections", "Pooled connections by state");
        describe_counter!(
            "pool_connections_closed_total",
            "Connections closed, by reason"
        );
        describe_counter!(
            "pool_acquire_timeouts_total",
            "Acquires that gave up waiting for a connection"
        );
        describe_histogram!(
            "pool_acquire_wait_seconds",
            "Time from acquire call to connection hand-out"
        );
    });
}

#[async_trait]
impl<M: ConnectionManager> HealthCheck for ConnectionPool<M> {
    fn name(&self) -> &str {
        ConnectionPool::name(self)
    }

    async fn check(&self) -> ComponentHealth {
        self.health_check().await
    }
}
