//! Ownership of every component and background task.
//!
//! Nothing in bulwark is global. A [`Registry`] is built once from
//! [`BulwarkSettings`], hands out the components, and owns the background
//! tasks they need. [`Registry::shutdown_all`] stops those tasks and closes
//! registered pools.

use crate::error::SettingsError;
use crate::health::{BreakerHealth, CacheHealth, RateLimiterHealth};
use crate::settings::BulwarkSettings;
use bulwark_cache::{CacheAdapter, RemoteStore};
use bulwark_circuitbreaker::CircuitBreakerRegistry;
use bulwark_healthcheck::HealthAggregator;
use bulwark_pool::{ConnectionManager, ConnectionPool};
use bulwark_ratelimiter::{BucketStore, RateLimiter};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

type PoolCloser = Box<dyn FnOnce() -> BoxFuture<'static, usize> + Send>;

/// What [`Registry::shutdown_all`] stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Background tasks stopped.
    pub tasks_stopped: usize,
    /// Pools closed.
    pub pools_closed: usize,
    /// Idle connections closed across those pools.
    pub connections_closed: usize,
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    settings: BulwarkSettings,
    cache_name: String,
    remote_cache: Option<Arc<dyn RemoteStore>>,
    bucket_store: Option<Arc<dyn BucketStore>>,
}

impl RegistryBuilder {
    /// Names the cache adapter. Its distributed breaker is
    /// `<name>.distributed`.
    ///
    /// Default: "cache"
    pub fn cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Supplies the store backing `redis` and `multi_tier` caches.
    pub fn remote_cache(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote_cache = Some(store);
        self
    }

    /// Supplies a shared bucket store so budgets hold across processes.
    pub fn bucket_store(mut self, store: Arc<dyn BucketStore>) -> Self {
        self.bucket_store = Some(store);
        self
    }

    /// Validates the settings and builds every component. No task is
    /// spawned until [`Registry::start`].
    pub fn build(self) -> Result<Registry, SettingsError> {
        let settings = self.settings;
        settings.validate()?;

        let breakers = CircuitBreakerRegistry::new(settings.circuit_breaker.template());
        let cache = settings
            .cache
            .build(&self.cache_name, self.remote_cache, &breakers)?;

        let limiter_builder = settings.rate_limit.builder();
        let limiter = match self.bucket_store {
            Some(store) => limiter_builder.try_build_with_store(store)?,
            None => limiter_builder.try_build()?,
        };

        let health = HealthAggregator::builder()
            .name("bulwark")
            .timeout(settings.health.check_timeout())
            .check(Arc::new(CacheHealth::new(Arc::clone(&cache))))
            .check(Arc::new(BreakerHealth::new(breakers.clone())))
            .check(Arc::new(RateLimiterHealth::new(limiter.clone())))
            .build();

        #[cfg(feature = "tracing")]
        tracing::info!(
            cache = settings.cache.kind(),
            distributed_limiter = limiter.is_distributed(),
            "bulwark registry built"
        );

        Ok(Registry {
            settings,
            breakers,
            cache,
            limiter,
            health: Arc::new(health),
            tasks: Mutex::new(Vec::new()),
            pools: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Owns the components built from one [`BulwarkSettings`].
pub struct Registry {
    settings: BulwarkSettings,
    breakers: CircuitBreakerRegistry,
    cache: Arc<dyn CacheAdapter>,
    limiter: RateLimiter,
    health: Arc<HealthAggregator>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    pools: Mutex<Vec<PoolCloser>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl Registry {
    /// Returns a builder over `settings`.
    pub fn builder(settings: BulwarkSettings) -> RegistryBuilder {
        RegistryBuilder {
            settings,
            cache_name: String::from("cache"),
            remote_cache: None,
            bucket_store: None,
        }
    }

    /// Builds a registry with no remote collaborators.
    pub fn from_settings(settings: BulwarkSettings) -> Result<Self, SettingsError> {
        Self::builder(settings).build()
    }

    /// The settings this registry was built from.
    pub fn settings(&self) -> &BulwarkSettings {
        &self.settings
    }

    /// Breakers, one per operation name.
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// The cache adapter.
    pub fn cache(&self) -> &Arc<dyn CacheAdapter> {
        &self.cache
    }

    /// The rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The health aggregator observing every component.
    pub fn health(&self) -> &Arc<HealthAggregator> {
        &self.health
    }

    /// Spawns the bucket sweeper, the health poller and, for caches with a
    /// distributed tier, the degraded-write reconciler. Calling it again
    /// does nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.shut_down.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let rate_limit = &self.settings.rate_limit;
        self.track(
            "ratelimiter.sweeper",
            self.limiter
                .spawn_sweeper(rate_limit.sweep_interval(), rate_limit.idle_ttl()),
        );
        self.track(
            "health.poller",
            self.health.spawn_poller(self.settings.health.poll_interval()),
        );
        if self.settings.cache.needs_remote() {
            self.track(
                "cache.reconciler",
                spawn_reconciler(
                    Arc::downgrade(&self.cache),
                    self.settings.cache_maintenance.reconcile_interval(),
                ),
            );
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(tasks = self.task_count(), "bulwark background tasks started");
    }

    /// Builds a pool from the pool settings, with its breaker taken from
    /// [`Self::breakers`], and registers it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build_pool<M: ConnectionManager>(
        &self,
        manager: M,
    ) -> Result<ConnectionPool<M>, SettingsError> {
        let settings = &self.settings.pool;
        let pool = settings
            .builder()
            .breaker(self.breakers.get(&format!("{}.connect", settings.name)))
            .build(manager)?;
        self.register_pool(&pool);
        Ok(pool)
    }

    /// Adds `pool` to the health report, spawns its maintenance task and
    /// closes it on shutdown.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register_pool<M: ConnectionManager>(&self, pool: &ConnectionPool<M>) {
        self.health.register(Arc::new(pool.clone()));
        self.track(
            format!("pool.{}.maintenance", pool.name()),
            pool.spawn_maintenance(self.settings.pool.maintenance_interval()),
        );

        let pool = pool.clone();
        self.pools
            .lock()
            .push(Box::new(move || -> BoxFuture<'static, usize> {
                Box::pin(async move { pool.close().await })
            }));
    }

    /// Takes ownership of a background task so that shutdown stops it.
    pub fn track(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        if self.shut_down.load(Ordering::Acquire) {
            handle.abort();
            return;
        }
        self.tasks.lock().push((name.into(), handle));
    }

    /// Number of background tasks currently owned.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns true once [`Self::shutdown_all`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stops every background task and closes every registered pool.
    /// Components stay usable for in-flight callers; pools reject new
    /// acquires.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        self.shut_down.store(true, Ordering::Release);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let pools = std::mem::take(&mut *self.pools.lock());

        let mut report = ShutdownReport::default();
        for (_, handle) in &tasks {
            handle.abort();
        }
        for (name, handle) in tasks {
            // Cancellation is the expected outcome here.
            let _ = handle.await;
            report.tasks_stopped += 1;

            #[cfg(feature = "tracing")]
            tracing::debug!(task = %name, "background task stopped");

            #[cfg(not(feature = "tracing"))]
            let _ = name;
        }
        for close in pools {
            report.connections_closed += close().await;
            report.pools_closed += 1;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            tasks = report.tasks_stopped,
            pools = report.pools_closed,
            connections = report.connections_closed,
            "bulwark shut down"
        );

        report
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("cache", &self.cache.name())
            .field("limiter", &self.limiter.name())
            .field("breakers", &self.breakers.len())
            .field("tasks", &self.task_count())
            .finish()
    }
}

fn spawn_reconciler(cache: Weak<dyn CacheAdapter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(cache) = cache.upgrade() else {
                break;
            };
            match cache.reconcile().await {
                Ok(repaired) => {
                    #[cfg(feature = "tracing")]
                    {
                        if repaired > 0 {
                            tracing::info!(cache = cache.name(), repaired, "reconciled degraded writes");
                        }
                    }

                    #[cfg(not(feature = "tracing"))]
                    let _ = repaired;
                }
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(cache = cache.name(), error = %err, "reconciliation deferred");

                    #[cfg(not(feature = "tracing"))]
                    let _ = err;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bulwark_cache::CacheAdapterConfig;
    use bulwark_healthcheck::HealthStatus;

    struct Always;

    #[async_trait]
    impl ConnectionManager for Always {
        type Connection = ();
        type Error = String;

        async fn connect(&self) -> Result<(), String> {
            Ok(())
        }

        async fn validate(&self, _conn: &mut ()) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_spawns_tasks_once() {
        let registry = Registry::from_settings(BulwarkSettings::default()).unwrap();
        registry.start();
        registry.start();
        // memory cache: no reconciler
        assert_eq!(registry.task_count(), 2);

        let report = registry.shutdown_all().await;
        assert_eq!(report.tasks_stopped, 2);
        assert_eq!(registry.task_count(), 0);
        assert!(registry.is_shut_down());
    }

    #[tokio::test]
    async fn distributed_cache_requires_remote_store() {
        let mut settings = BulwarkSettings::default();
        settings.cache = CacheAdapterConfig::MultiTier {
            local: Default::default(),
            distributed: Default::default(),
        };
        let err = Registry::from_settings(settings).unwrap_err();
        assert!(matches!(err, SettingsError::Cache(_)));
    }

    #[tokio::test]
    async fn pools_are_reported_and_closed() {
        let mut settings = BulwarkSettings::default();
        settings.pool.name = "orders".into();
        let registry = Registry::from_settings(settings).unwrap();
        let pool = registry.build_pool(Always).unwrap();
        drop(pool.acquire().await.unwrap());

        assert_eq!(pool.breaker().name(), "orders.connect");
        assert!(registry.breakers().len() >= 1);

        let health = registry.health().check_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.checks.contains_key("orders"));
        assert!(health.checks.contains_key("circuit_breakers"));

        let report = registry.shutdown_all().await;
        assert_eq!(report.pools_closed, 1);
        assert_eq!(report.connections_closed, 1);
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn tasks_tracked_after_shutdown_are_aborted() {
        let registry = Registry::from_settings(BulwarkSettings::default()).unwrap();
        registry.shutdown_all().await;

        registry.track("late", tokio::spawn(std::future::pending::<()>()));
        registry.start();
        assert_eq!(registry.task_count(), 0);
    }
}
