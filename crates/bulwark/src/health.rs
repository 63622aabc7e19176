//! Health checks for the components that do not carry their own.
//!
//! The pool implements `HealthCheck` in its own crate; these wrappers cover
//! the cache, the breaker registry and the rate limiter.

use async_trait::async_trait;
use bulwark_cache::CacheAdapter;
use bulwark_circuitbreaker::{CircuitBreakerRegistry, CircuitState};
use bulwark_healthcheck::{ComponentHealth, HealthCheck, HealthStatus};
use bulwark_ratelimiter::RateLimiter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const PROBE_KEY: &str = "__bulwark_health_probe__";

/// Probes a cache adapter with a read.
///
/// A failed read is unhealthy. Tier errors counted since the previous check
/// (a distributed tier dropping out behind a working local tier) make the
/// cache degraded.
pub struct CacheHealth {
    name: String,
    adapter: Arc<dyn CacheAdapter>,
    seen_errors: AtomicU64,
}

impl CacheHealth {
    /// Wraps `adapter`, reporting under `cache.<adapter name>`.
    pub fn new(adapter: Arc<dyn CacheAdapter>) -> Self {
        Self {
            name: format!("cache.{}", adapter.name()),
            seen_errors: AtomicU64::new(adapter.stats().errors),
            adapter,
        }
    }
}

#[async_trait]
impl HealthCheck for CacheHealth {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ComponentHealth {
        let started = Instant::now();
        let probe = self.adapter.get(PROBE_KEY).await;
        let stats = self.adapter.stats();
        let previous = self.seen_errors.swap(stats.errors, Ordering::Relaxed);

        let report = match probe {
            Err(err) => ComponentHealth::unhealthy(self.name.clone(), err.to_string()),
            Ok(_) if stats.errors > previous => {
                ComponentHealth::degraded(self.name.clone(), "tier errors since last check")
            }
            Ok(_) => ComponentHealth::healthy(self.name.clone()),
        };

        report
            .with_detail("entries", stats.entries)
            .with_detail("hit_rate", format!("{:.3}", stats.hit_rate()))
            .with_detail("degraded_writes", stats.degraded_writes)
            .with_latency(started.elapsed())
    }
}

/// Reports the breakers in a registry.
///
/// Any open breaker makes the report degraded: the guarded dependency is
/// down but callers are failing fast rather than piling up.
pub struct BreakerHealth {
    registry: CircuitBreakerRegistry,
}

impl BreakerHealth {
    /// Wraps `registry`.
    pub fn new(registry: CircuitBreakerRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl HealthCheck for BreakerHealth {
    fn name(&self) -> &str {
        "circuit_breakers"
    }

    async fn check(&self) -> ComponentHealth {
        let mut open = Vec::new();
        let mut half_open = 0usize;
        for breaker in self.registry.breakers() {
            match breaker.state() {
                CircuitState::Open => open.push(breaker.name().to_string()),
                CircuitState::HalfOpen => half_open += 1,
                CircuitState::Closed => {}
            }
        }
        open.sort();

        let status = if open.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        let mut report = ComponentHealth::new("circuit_breakers", status)
            .with_detail("breakers", self.registry.len())
            .with_detail("half_open", half_open);
        if !open.is_empty() {
            report = report.with_detail("open", open.join(","));
        }
        report
    }
}

/// Reports a rate limiter.
///
/// A limiter falling back to local enforcement since the previous check is
/// degraded; budgets are then enforced per process.
pub struct RateLimiterHealth {
    name: String,
    limiter: RateLimiter,
    seen_fallbacks: AtomicU64,
}

impl RateLimiterHealth {
    /// Wraps `limiter`, reporting under `ratelimiter.<limiter name>`.
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            name: format!("ratelimiter.{}", limiter.name()),
            seen_fallbacks: AtomicU64::new(limiter.stats().store_fallbacks),
            limiter,
        }
    }
}

#[async_trait]
impl HealthCheck for RateLimiterHealth {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ComponentHealth {
        let stats = self.limiter.stats();
        let previous = self
            .seen_fallbacks
            .swap(stats.store_fallbacks, Ordering::Relaxed);

        let report = if stats.store_fallbacks > previous {
            ComponentHealth::degraded(self.name.clone(), "shared bucket store unavailable")
        } else {
            ComponentHealth::healthy(self.name.clone())
        };

        report
            .with_detail("distributed", self.limiter.is_distributed())
            .with_detail("allowed", stats.allowed)
            .with_detail("denied", stats.denied)
            .with_detail("buckets", stats.local_buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_cache::MemoryCache;
    use bulwark_circuitbreaker::CircuitBreakerConfig;

    #[tokio::test]
    async fn memory_cache_is_healthy() {
        let cache: Arc<dyn CacheAdapter> =
            Arc::new(MemoryCache::builder().name("sessions").build().unwrap());
        let check = CacheHealth::new(cache);

        let report = check.check().await;
        assert_eq!(check.name(), "cache.sessions");
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.details.get("entries").map(String::as_str), Some("0"));
    }

    #[tokio::test]
    async fn open_breaker_degrades_report() {
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::builder()
                .failure_threshold(1)
                .into_config(),
        );
        registry.get("orders.db");
        let check = BreakerHealth::new(registry.clone());
        assert_eq!(check.check().await.status, HealthStatus::Healthy);

        let _ = registry
            .get("orders.db")
            .call(|| async { Err::<(), _>("refused") })
            .await;

        let report = check.check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.details.get("open").map(String::as_str), Some("orders.db"));
    }

    #[tokio::test]
    async fn local_limiter_is_healthy() {
        let limiter = RateLimiter::builder().name("api").default_policy(1, 1.0).build();
        limiter.check("client").await;
        limiter.check("client").await;

        let check = RateLimiterHealth::new(limiter);
        let report = check.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.details.get("denied").map(String::as_str), Some("1"));
        assert_eq!(report.details.get("distributed").map(String::as_str), Some("false"));
    }
}
