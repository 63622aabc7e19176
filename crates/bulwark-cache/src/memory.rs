//! Bounded in-process cache tier.

use crate::adapter::{CacheAdapter, CacheStats, WriteOutcome};
use crate::entry::{CacheEntry, Tier};
use crate::error::{CacheError, ConfigError};
use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
#[cfg(feature = "metrics")]
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    pub(crate) name: String,
    pub(crate) max_size: usize,
    pub(crate) default_ttl: Option<Duration>,
    pub(crate) shards: usize,
}

impl MemoryCacheConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> MemoryCacheConfigBuilder {
        MemoryCacheConfigBuilder::new()
    }

    /// TTL applied to writes that do not specify one.
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }
}

/// Builder for [`MemoryCacheConfig`].
#[derive(Debug, Clone)]
pub struct MemoryCacheConfigBuilder {
    name: String,
    max_size: usize,
    default_ttl: Option<Duration>,
    shards: usize,
}

impl MemoryCacheConfigBuilder {
    /// Creates a builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("memory"),
            max_size: 10_000,
            default_ttl: Some(Duration::from_secs(300)),
            shards: 16,
        }
    }

    /// Names the cache.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the maximum number of entries across all shards.
    ///
    /// Default: 10,000
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the TTL for writes that do not pass one. `None` keeps such
    /// entries until evicted.
    ///
    /// Default: 5 minutes
    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the number of independently locked shards. Capped at
    /// `max_size` so every shard holds at least one entry.
    ///
    /// Default: 16
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Validates and finishes the configuration.
    pub fn into_config(self) -> Result<MemoryCacheConfig, ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::new("memory cache max_size must be at least 1"));
        }
        if self.shards == 0 {
            return Err(ConfigError::new("memory cache shards must be at least 1"));
        }
        if self.default_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(ConfigError::new("memory cache default_ttl must be non-zero"));
        }
        Ok(MemoryCacheConfig {
            name: self.name,
            max_size: self.max_size,
            default_ttl: self.default_ttl,
            shards: self.shards.min(self.max_size),
        })
    }

    /// Builds the cache.
    pub fn build(self) -> Result<MemoryCache, ConfigError> {
        Ok(MemoryCache::new(self.into_config()?))
    }
}

impl Default for MemoryCacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sharded LRU cache with per-entry TTL.
///
/// Keys hash to one of several shards, each behind its own lock, so
/// unrelated keys rarely contend. Each shard evicts its least recently used
/// entry when full. No operation here ever fails or waits on I/O.
pub struct MemoryCache {
    config: MemoryCacheConfig,
    shards: Vec<Mutex<LruCache<String, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    /// Creates a cache from a validated configuration.
    pub fn new(config: MemoryCacheConfig) -> Self {
        #[cfg(feature = "metrics")]
        crate::describe_metrics();

        let shard_count = config.shards.max(1);
        let per_shard = config.max_size.div_ceil(shard_count).max(1);
        let capacity = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);

        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(LruCache::new(capacity)))
                .collect(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns a configuration builder.
    pub fn builder() -> MemoryCacheConfigBuilder {
        MemoryCacheConfigBuilder::new()
    }

    /// TTL applied to writes that do not specify one.
    pub fn default_ttl(&self) -> Option<Duration> {
        self.config.default_ttl
    }

    fn shard(&self, key: &str) -> &Mutex<LruCache<String, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Returns the live entry for `key`, dropping it if expired.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let found = {
            let mut shard = self.shard(key).lock();
            let live = shard
                .get(key)
                .map(|entry| (!entry.is_expired(now)).then(|| entry.clone()));
            match live {
                Some(Some(entry)) => Some(entry),
                Some(None) => {
                    shard.pop(key);
                    None
                }
                None => None,
            }
        };

        match found {
            Some(entry) => {
                self.record_hit();
                Some(entry)
            }
            None => {
                self.record_miss();
                None
            }
        }
    }

    /// Stores `value`, falling back to the default TTL when `ttl` is `None`.
    pub fn insert(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let ttl = ttl.or(self.config.default_ttl);
        let entry = CacheEntry::new(key.to_string(), value, ttl, Tier::Local, Instant::now());

        let displaced = self.shard(key).lock().push(key.to_string(), entry);
        self.writes.fetch_add(1, Ordering::Relaxed);

        if let Some((displaced_key, _)) = displaced {
            if displaced_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);

                #[cfg(feature = "metrics")]
                counter!("cache_evictions_total", "cache" => self.config.name.clone()).increment(1);
            }
        }

        #[cfg(feature = "metrics")]
        gauge!("cache_size", "cache" => self.config.name.clone()).set(self.len() as f64);
    }

    /// Removes `key`, returning whether a live entry was present.
    pub fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        self.shard(key)
            .lock()
            .pop(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Drops every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock();
                let expired: Vec<String> = shard
                    .iter()
                    .filter(|(_, entry)| entry.is_expired(now))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &expired {
                    shard.pop(key);
                }
                expired.len()
            })
            .sum()
    }

    /// Number of entries held, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Returns true if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("cache_requests_total", "cache" => self.config.name.clone(), "result" => "hit")
            .increment(1);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("cache_requests_total", "cache" => self.config.name.clone(), "result" => "miss")
            .increment(1);
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("name", &self.config.name)
            .field("max_size", &self.config.max_size)
            .field("len", &self.len())
            .finish()
    }
}

#[async_trait]
impl CacheAdapter for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        Ok(self.get_entry(key).map(|entry| entry.value))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome, CacheError> {
        self.insert(key, value, ttl);
        Ok(WriteOutcome::Stored)
    }

    async fn delete(&self, key: &str) -> Result<WriteOutcome, CacheError> {
        self.remove(key);
        Ok(WriteOutcome::Stored)
    }

    async fn clear(&self) -> Result<WriteOutcome, CacheError> {
        for shard in &self.shards {
            shard.lock().clear();
        }
        Ok(WriteOutcome::Stored)
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            local_hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
            ..Default::default()
        }
    }
}
