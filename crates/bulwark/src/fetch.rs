use crate::error::SettingsError;
use crate::registry::Registry;
use crate::settings::BulwarkSettings;
use bulwark_core::ResilienceError;
use bulwark_healthcheck::SystemHealth;
use bulwark_pool::{ConnectionManager, ConnectionPool, PooledConnection};
use bulwark_ratelimiter::RateLimitDecision;
use bulwark_singleflight::{SingleFlight, SingleFlightError, SingleFlightStats};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One read through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    key: String,
    client: String,
    operation: String,
    ttl: Option<Duration>,
}

impl FetchRequest {
    /// A request for `key`, charged to the `anonymous` client and guarded
    /// by the `fetch` breaker.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            client: String::from("anonymous"),
            operation: String::from("fetch"),
            ttl: None,
        }
    }

    /// Sets the rate-limit key.
    pub fn client(mut self, client: impl Into<String>) -> Self {
        self.client = client.into();
        self
    }

    /// Sets the breaker name guarding the loader.
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Sets the TTL for the cached result. `None` uses the cache default.
    pub fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// The cache and single-flight key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Where a fetched value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// A cache tier.
    Cache,
    /// The loader, run by this caller or by a concurrent one for the same key.
    Loader,
}

/// A successful fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// The value.
    pub value: Bytes,
    /// Where it came from.
    pub source: FetchSource,
    /// The admission decision, for rate-limit response headers.
    pub rate_limit: RateLimitDecision,
}

/// The full read path over one connection pool.
///
/// [`Bulwark::fetch`] runs, in order: rate-limit admission for the client,
/// a cache lookup, and on a miss a single-flight computation that takes a
/// permit from the operation's breaker, acquires a pooled connection, runs
/// the loader and writes the result back to the cache.
///
/// `E` is the loader's error type.
pub struct Bulwark<M: ConnectionManager, E> {
    registry: Arc<Registry>,
    pool: ConnectionPool<M>,
    flights: SingleFlight<String, Bytes, ResilienceError<E>>,
}

impl<M: ConnectionManager, E> Clone for Bulwark<M, E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            pool: self.pool.clone(),
            flights: self.flights.clone(),
        }
    }
}

impl<M, E> Bulwark<M, E>
where
    M: ConnectionManager,
    E: Clone + Send + Sync + 'static,
{
    /// Assembles a pipeline from an existing registry and pool.
    pub fn new(registry: Arc<Registry>, pool: ConnectionPool<M>) -> Self {
        let flights = SingleFlight::with_config(registry.settings().single_flight.config("fetch"));
        Self {
            registry,
            pool,
            flights,
        }
    }

    /// Builds a registry from `settings`, a pool over `manager`, and starts
    /// the background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_settings(settings: BulwarkSettings, manager: M) -> Result<Self, SettingsError> {
        let registry = Arc::new(Registry::from_settings(settings)?);
        let pool = registry.build_pool(manager)?;
        registry.start();
        Ok(Self::new(registry, pool))
    }

    /// The registry owning the components.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The connection pool.
    pub fn pool(&self) -> &ConnectionPool<M> {
        &self.pool
    }

    /// Deduplication counters.
    pub fn single_flight_stats(&self) -> SingleFlightStats {
        self.flights.stats()
    }

    /// Runs every health check now.
    pub async fn health(&self) -> SystemHealth {
        self.registry.health().check_health().await
    }

    /// Reads `request.key`, loading it on a miss.
    ///
    /// Cache read and write failures are logged and treated as a miss and a
    /// skipped write; they never fail the fetch. Pool failures surface as
    /// their own errors without counting against the operation's breaker;
    /// only loader errors do.
    pub async fn fetch<F, Fut>(
        &self,
        request: FetchRequest,
        loader: F,
    ) -> Result<Fetched, ResilienceError<E>>
    where
        F: FnOnce(PooledConnection<M>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes, E>> + Send + 'static,
    {
        let decision = self.registry.limiter().acquire(&request.client).await?;

        match self.registry.cache().get(&request.key).await {
            Ok(Some(value)) => {
                return Ok(Fetched {
                    value,
                    source: FetchSource::Cache,
                    rate_limit: decision,
                })
            }
            Ok(None) => {}
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %request.key, error = %err, "cache read failed, loading");

                #[cfg(not(feature = "tracing"))]
                let _ = err;
            }
        }

        let breaker = self.registry.breakers().get(&request.operation);
        let pool = self.pool.clone();
        let cache = Arc::clone(self.registry.cache());
        let key = request.key.clone();
        let ttl = request.ttl;

        let loaded = self
            .flights
            .execute(request.key.clone(), move || async move {
                let permit = breaker.permit::<E>()?;
                // An unresolved permit records nothing: pool trouble is the
                // pool breaker's business.
                let conn = pool.acquire().await?;
                let value = match loader(conn).await {
                    Ok(value) => {
                        permit.success();
                        value
                    }
                    Err(err) => {
                        permit.failure();
                        return Err(ResilienceError::Application(err));
                    }
                };

                if let Err(err) = cache.set(&key, value.clone(), ttl).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(key = %key, error = %err, "cache write failed");

                    #[cfg(not(feature = "tracing"))]
                    let _ = err;
                }
                Ok::<_, ResilienceError<E>>(value)
            })
            .await;

        match loaded {
            Ok(value) => Ok(Fetched {
                value,
                source: FetchSource::Loader,
                rate_limit: decision,
            }),
            Err(SingleFlightError::Compute(err)) => Err(err),
            Err(SingleFlightError::Abandoned) => Err(ResilienceError::ResourceUnavailable {
                resource: request.operation,
                reason: String::from("loader did not complete"),
            }),
        }
    }

    /// Stops background tasks and closes the pool.
    pub async fn shutdown(&self) -> crate::ShutdownReport {
        self.registry.shutdown_all().await
    }
}

impl<M: ConnectionManager, E> std::fmt::Debug for Bulwark<M, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulwark")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Db {
        connects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConnectionManager for Db {
        type Connection = usize;
        type Error = String;

        async fn connect(&self) -> Result<usize, String> {
            Ok(self.connects.fetch_add(1, Ordering::SeqCst))
        }

        async fn validate(&self, _conn: &mut usize) -> Result<(), String> {
            Ok(())
        }
    }

    fn pipeline(settings: BulwarkSettings) -> Bulwark<Db, String> {
        Bulwark::from_settings(settings, Db::default()).unwrap()
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let bulwark = pipeline(BulwarkSettings::default());
        let loads = Arc::new(AtomicUsize::new(0));

        for expected in [FetchSource::Loader, FetchSource::Cache] {
            let loads = Arc::clone(&loads);
            let fetched = bulwark
                .fetch(FetchRequest::new("user:1"), move |_conn| async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Bytes::from_static(b"alice"))
                })
                .await
                .unwrap();
            assert_eq!(fetched.value, Bytes::from_static(b"alice"));
            assert_eq!(fetched.source, expected);
            assert!(fetched.rate_limit.allowed);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        bulwark.shutdown().await;
    }

    #[tokio::test]
    async fn denied_client_never_reaches_loader() {
        let mut settings = BulwarkSettings::default();
        settings.rate_limit.default_capacity = 1;
        settings.rate_limit.default_refill_per_second = 0.5;
        let bulwark = pipeline(settings);

        let ok = bulwark
            .fetch(FetchRequest::new("a").client("c"), |_conn| async {
                Ok(Bytes::from_static(b"1"))
            })
            .await;
        assert!(ok.is_ok());

        let denied = bulwark
            .fetch(FetchRequest::new("b").client("c"), |_conn| async {
                Ok(Bytes::from_static(b"2"))
            })
            .await
            .unwrap_err();
        assert!(denied.is_rate_limited());
        assert!(denied.retry_after().is_some());
        bulwark.shutdown().await;
    }

    #[tokio::test]
    async fn loader_failures_open_the_operation_breaker() {
        let mut settings = BulwarkSettings::default();
        settings.circuit_breaker.failure_threshold = 2;
        let bulwark = pipeline(settings);

        for key in ["k1", "k2"] {
            let err = bulwark
                .fetch(FetchRequest::new(key).operation("profile"), |_conn| async {
                    Err::<Bytes, _>("db down".to_string())
                })
                .await
                .unwrap_err();
            assert_eq!(err.application_error(), Some("db down".to_string()));
        }

        let err = bulwark
            .fetch(FetchRequest::new("k3").operation("profile"), |_conn| async {
                Ok(Bytes::new())
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());

        // other operations are unaffected
        assert!(bulwark
            .fetch(FetchRequest::new("k4").operation("orders"), |_conn| async {
                Ok(Bytes::new())
            })
            .await
            .is_ok());
        bulwark.shutdown().await;
    }

    #[tokio::test]
    async fn failed_loads_are_not_cached() {
        let mut settings = BulwarkSettings::default();
        settings.single_flight.grace_ms = 0;
        let bulwark = pipeline(settings);

        let _ = bulwark
            .fetch(FetchRequest::new("flaky"), |_conn| async {
                Err::<Bytes, _>("timeout".to_string())
            })
            .await;
        let fetched = bulwark
            .fetch(FetchRequest::new("flaky"), |_conn| async {
                Ok(Bytes::from_static(b"ok"))
            })
            .await
            .unwrap();
        assert_eq!(fetched.source, FetchSource::Loader);
        bulwark.shutdown().await;
    }
}
