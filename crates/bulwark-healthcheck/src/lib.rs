//! Health aggregation for bulwark components.
//!
//! Each component implements [`HealthCheck`], reporting a
//! [`ComponentHealth`]. A [`HealthAggregator`] runs every registered check
//! concurrently and reports the worst status as the system status:
//!
//! - `Healthy`: everything is working.
//! - `Degraded`: working with reduced guarantees (memory-only cache,
//!   local-only rate limiting, a saturated pool). Health endpoints still
//!   answer 200.
//! - `Unhealthy`: a component is unusable. Health endpoints answer 503.
//!
//! # Examples
//!
//! ```rust
//! use bulwark_healthcheck::{ComponentHealth, FnHealthCheck, HealthAggregator, HealthStatus};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let aggregator = HealthAggregator::builder()
//!     .check(Arc::new(FnHealthCheck::new("db", || async {
//!         ComponentHealth::healthy("db").with_detail("connections", 4)
//!     })))
//!     .build();
//!
//! let health = aggregator.check_health().await;
//! assert_eq!(health.status, HealthStatus::Healthy);
//! assert_eq!(health.http_status(), 200);
//! # }
//! ```

mod aggregator;
mod events;
mod status;

pub use aggregator::{HealthAggregator, HealthAggregatorBuilder};
pub use events::HealthEvent;
pub use status::{ComponentHealth, HealthStatus, SystemHealth};

use async_trait::async_trait;
use std::future::Future;

#[cfg(feature = "metrics")]
static METRICS_INIT: std::sync::Once = std::sync::Once::new();

#[cfg(feature = "metrics")]
pub(crate) fn describe_metrics() {
    METRICS_INIT.call_once(|| {
        metrics::describe_gauge!(
            "health_status",
            "Last reported component health (0 healthy, 1 degraded, 2 unhealthy)"
        );
    });
}

/// A component that can report its own health.
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    /// Name under which the report appears in [`SystemHealth::checks`].
    fn name(&self) -> &str;

    /// Checks the component. Implementations should be cheap; the aggregator
    /// applies its own timeout.
    async fn check(&self) -> ComponentHealth;
}

/// A [`HealthCheck`] backed by a closure.
pub struct FnHealthCheck<F> {
    name: String,
    f: F,
}

impl<F> FnHealthCheck<F> {
    /// Wraps `f` under `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> HealthCheck for FnHealthCheck<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ComponentHealth> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ComponentHealth {
        (self.f)().await
    }
}
