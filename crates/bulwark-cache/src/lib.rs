//! Cache adapters with a uniform async contract.
//!
//! Every adapter implements [`CacheAdapter`]: `get` returns `Ok(None)` for
//! absent or expired keys, and writes report whether they reached every tier
//! ([`WriteOutcome::Stored`]) or only the local one
//! ([`WriteOutcome::Degraded`]).
//!
//! - [`MemoryCache`]: sharded in-process LRU with per-entry TTL.
//! - [`DistributedCache`]: a [`RemoteStore`] behind a timeout and its own
//!   circuit breaker.
//! - [`MultiTierCache`]: memory in front of a distributed tier, with
//!   backfill on distributed hits and memory-only operation while the
//!   distributed tier is down.
//! - [`PromptCache`]: normalizes prompts into namespaced keys.
//!
//! [`CacheAdapterConfig`] builds any of these from a tagged configuration.
//!
//! # Examples
//!
//! ```
//! use bulwark_cache::{CacheAdapter, MemoryCache};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = MemoryCache::builder()
//!     .max_size(1_000)
//!     .default_ttl(Some(Duration::from_secs(60)))
//!     .build()?;
//!
//! cache.set("user:1", Bytes::from_static(b"{\"name\":\"ada\"}"), None).await?;
//! assert!(cache.get("user:1").await?.is_some());
//! # Ok(())
//! # }
//! ```

mod adapter;
mod config;
mod distributed;
mod entry;
mod error;
mod events;
mod memory;
mod multi_tier;
mod prompt;

pub use adapter::{CacheAdapter, CacheStats, WriteOutcome};
pub use config::{CacheAdapterConfig, DistributedSettings, MemorySettings};
pub use distributed::{DistributedCache, DistributedCacheBuilder, RemoteStore, RemoteValue};
pub use entry::{CacheEntry, Tier};
pub use error::{CacheError, ConfigError};
pub use events::CacheEvent;
pub use memory::{MemoryCache, MemoryCacheConfig, MemoryCacheConfigBuilder};
pub use multi_tier::{MultiTierCache, MultiTierCacheBuilder, TierMode};
pub use prompt::PromptCache;

#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge};

#[cfg(feature = "metrics")]
static METRICS_INIT: std::sync::Once = std::sync::Once::new();

/// Describes the cache metrics once per process.
#[cfg(feature = "metrics")]
pub(crate) fn describe_metrics() {
    METRICS_INIT.call_once(|| {
        describe_counter!(
            "cache_requests_total",
            "Cache reads by result (hit or miss) and tier"
        );
        describe_counter!(
            "cache_evictions_total",
            "Entries evicted to stay within max_size"
        );
        describe_counter!(
            "cache_degraded_writes_total",
            "Writes that reached the local tier only"
        );
        describe_gauge!("cache_size", "Entries held by a memory cache");
    });
}
