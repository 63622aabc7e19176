use crate::error::CacheError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Result of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every tier accepted the write.
    Stored,
    /// The write landed in the local tier only; the distributed tier was
    /// unavailable. Readers in other processes may not see it.
    Degraded,
}

impl WriteOutcome {
    /// Returns true for [`WriteOutcome::Degraded`].
    pub fn is_degraded(&self) -> bool {
        matches!(self, WriteOutcome::Degraded)
    }

    /// Merges the outcomes of writes to several adapters.
    pub fn combine(self, other: WriteOutcome) -> WriteOutcome {
        if self.is_degraded() || other.is_degraded() {
            WriteOutcome::Degraded
        } else {
            WriteOutcome::Stored
        }
    }
}

/// Counters describing cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CacheStats {
    /// Reads served from the local tier.
    pub local_hits: u64,
    /// Reads served from the distributed tier.
    pub distributed_hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Distributed hits copied into the local tier.
    pub backfills: u64,
    /// Successful writes.
    pub writes: u64,
    /// Writes that only reached the local tier.
    pub degraded_writes: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Tier operations that failed.
    pub errors: u64,
    /// Entries currently held locally.
    pub entries: usize,
}

impl CacheStats {
    /// Total hits across tiers.
    pub fn hits(&self) -> u64 {
        self.local_hits + self.distributed_hits
    }

    /// Fraction of reads that hit any tier, from 0.0 to 1.0.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

/// Uniform get/set/delete contract shared by every cache adapter.
///
/// Implementations are thread-safe and used behind `Arc<dyn CacheAdapter>`.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Returns the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Stores `value` under `key`. `ttl` of `None` uses the adapter default.
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome, CacheError>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> Result<WriteOutcome, CacheError>;

    /// Removes every entry.
    async fn clear(&self) -> Result<WriteOutcome, CacheError>;

    /// Returns true if `key` has a live entry.
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Re-pushes writes that were accepted in degraded mode, returning how
    /// many were repaired. Adapters without a remote tier have nothing to do.
    async fn reconcile(&self) -> Result<usize, CacheError> {
        Ok(0)
    }

    /// Adapter name, used in logs, metrics and health reports.
    fn name(&self) -> &str;

    /// Activity counters.
    fn stats(&self) -> CacheStats;
}
