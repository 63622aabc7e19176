//! Distributed cache tier.
//!
//! [`RemoteStore`] is the contract for a shared cache server (Redis,
//! Memcached, a sidecar). [`DistributedCache`] wraps one with a timeout on
//! every round trip and a circuit breaker of its own, so a dead cache server
//! is stopped being called quickly and never shares failure state with the
//! database breaker.

use crate::adapter::{CacheAdapter, CacheStats, WriteOutcome};
use crate::error::{CacheError, ConfigError};
use async_trait::async_trait;
use bulwark_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A value read from a remote store, with the store's remaining TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteValue {
    /// The stored payload.
    pub value: Bytes,
    /// Time left before the store expires the key; `None` if it never does.
    pub ttl: Option<Duration>,
}

/// A shared key-value store reachable over the network.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads `key` with its remaining TTL.
    async fn get(&self, key: &str) -> Result<Option<RemoteValue>, CacheError>;

    /// Writes `key`, expiring it after `ttl` when given.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Deletes `key`.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes every key owned by this cache.
    async fn clear(&self) -> Result<(), CacheError>;
}

/// Builder for [`DistributedCache`].
pub struct DistributedCacheBuilder {
    store: Arc<dyn RemoteStore>,
    name: String,
    timeout: Duration,
    breaker: Option<CircuitBreaker>,
}

impl DistributedCacheBuilder {
    /// Names the cache. The default breaker is named `<name>.distributed`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the timeout for each remote round trip.
    ///
    /// Default: 100 milliseconds
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Uses an existing breaker, typically one handed out by a
    /// `CircuitBreakerRegistry`.
    pub fn breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Builds the cache.
    pub fn build(self) -> Result<DistributedCache, ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::new("distributed cache timeout must be non-zero"));
        }
        let breaker = self.breaker.unwrap_or_else(|| {
            CircuitBreaker::new(
                CircuitBreakerConfig::default().with_name(format!("{}.distributed", self.name)),
            )
        });
        Ok(DistributedCache {
            store: self.store,
            name: self.name,
            timeout: self.timeout,
            breaker,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }
}

/// A [`RemoteStore`] guarded by a timeout and a circuit breaker.
pub struct DistributedCache {
    store: Arc<dyn RemoteStore>,
    name: String,
    timeout: Duration,
    breaker: CircuitBreaker,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

impl DistributedCache {
    /// Starts building a cache over `store`.
    pub fn builder(store: Arc<dyn RemoteStore>) -> DistributedCacheBuilder {
        DistributedCacheBuilder {
            store,
            name: String::from("distributed"),
            timeout: Duration::from_millis(100),
            breaker: None,
        }
    }

    /// The breaker guarding the remote store.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Reads `key` together with the store's remaining TTL.
    pub async fn get_with_ttl(&self, key: &str) -> Result<Option<RemoteValue>, CacheError> {
        let result = self.guarded(self.store.get(key)).await;
        match &result {
            Ok(Some(_)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
        result
    }

    async fn guarded<T, Fut>(&self, operation: Fut) -> Result<T, CacheError>
    where
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let timeout = self.timeout;
        let result = self
            .breaker
            .call(|| async move {
                tokio::time::timeout(timeout, operation)
                    .await
                    .unwrap_or(Err(CacheError::Timeout(timeout)))
            })
            .await
            .map_err(|err| match err {
                CircuitBreakerError::OpenCircuit { name } => CacheError::CircuitOpen(name),
                CircuitBreakerError::Inner(err) => err,
            });

        if let Err(err) = &result {
            self.errors.fetch_add(1, Ordering::Relaxed);

            #[cfg(feature = "tracing")]
            tracing::debug!(cache = %self.name, error = %err, "distributed tier call failed");

            #[cfg(not(feature = "tracing"))]
            let _ = err;
        }
        result
    }
}

impl std::fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("breaker", &self.breaker)
            .finish()
    }
}

#[async_trait]
impl CacheAdapter for DistributedCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        Ok(self.get_with_ttl(key).await?.map(|remote| remote.value))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome, CacheError> {
        self.guarded(self.store.set(key, value, ttl)).await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(WriteOutcome::Stored)
    }

    async fn delete(&self, key: &str) -> Result<WriteOutcome, CacheError> {
        self.guarded(self.store.delete(key)).await?;
        Ok(WriteOutcome::Stored)
    }

    async fn clear(&self) -> Result<WriteOutcome, CacheError> {
        self.guarded(self.store.clear()).await?;
        Ok(WriteOutcome::Stored)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            distributed_hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_circuitbreaker::CircuitState;

    struct DownStore;

    #[async_trait]
    impl RemoteStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<RemoteValue>, CacheError> {
            Err(CacheError::Remote("connection refused".into()))
        }
        async fn set(&self, _: &str, _: Bytes, _: Option<Duration>) -> Result<(), CacheError> {
            Err(CacheError::Remote("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Remote("connection refused".into()))
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Err(CacheError::Remote("connection refused".into()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl RemoteStore for SlowStore {
        async fn get(&self, _key: &str) -> Result<Option<RemoteValue>, CacheError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn set(&self, _: &str, _: Bytes, _: Option<Duration>) -> Result<(), CacheError> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn breaker_opens_after_repeated_failures() {
        let breaker = CircuitBreaker::builder()
            .name("sessions.distributed")
            .failure_threshold(2)
            .build();
        let cache = DistributedCache::builder(Arc::new(DownStore))
            .name("sessions")
            .breaker(breaker.clone())
            .build()
            .unwrap();

        assert!(matches!(cache.get("k").await, Err(CacheError::Remote(_))));
        assert!(matches!(cache.get("k").await, Err(CacheError::Remote(_))));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            cache.get("k").await,
            Err(CacheError::CircuitOpen("sessions.distributed".to_string()))
        );
        assert_eq!(cache.stats().errors, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let cache = DistributedCache::builder(Arc::new(SlowStore))
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        assert_eq!(
            cache.get("k").await,
            Err(CacheError::Timeout(Duration::from_millis(50)))
        );
    }

    #[test]
    fn default_breaker_is_named_after_cache() {
        let cache = DistributedCache::builder(Arc::new(SlowStore))
            .name("sessions")
            .build()
            .unwrap();
        assert_eq!(cache.breaker().name(), "sessions.distributed");
    }
}
