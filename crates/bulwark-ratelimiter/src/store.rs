//! Bucket storage.
//!
//! A [`BucketStore`] performs the refill-and-consume step for one key as a
//! single atomic operation. [`LocalBucketStore`] keeps buckets in process;
//! a shared store (a remote key-value server running the step as one
//! script, for instance) implements the same trait so several processes can
//! enforce one budget.

use crate::bucket::{BucketPolicy, Consumption, TokenBucket};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;

/// Atomic refill-and-consume over keyed token buckets.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Refills the bucket for `key` (creating it full under `policy` if
    /// absent), then consumes `cost` tokens if available.
    ///
    /// Implementations must perform the whole step as one atomic update so
    /// that concurrent checks for the same key never over-admit.
    async fn consume(
        &self,
        key: &str,
        policy: BucketPolicy,
        cost: u32,
        now_ms: u64,
    ) -> Result<Consumption, StoreError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// In-process bucket store on a sharded concurrent map, so unrelated keys
/// do not contend on one lock.
pub struct LocalBucketStore {
    buckets: DashMap<String, TokenBucket>,
    shard_amount: usize,
}

impl LocalBucketStore {
    /// Creates a store with roughly `shards` independently locked shards,
    /// rounded up to a power of two (minimum 2).
    pub fn new(shards: usize) -> Self {
        let shard_amount = shards.max(2).next_power_of_two();
        Self {
            buckets: DashMap::with_shard_amount(shard_amount),
            shard_amount,
        }
    }

    /// Synchronous refill-and-consume, atomic under the key's shard lock.
    pub fn consume_now(
        &self,
        key: &str,
        policy: BucketPolicy,
        cost: u32,
        now_ms: u64,
    ) -> Consumption {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return bucket.try_consume(cost, now_ms);
        }
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(policy, now_ms))
            .try_consume(cost, now_ms)
    }

    /// Returns a copy of the bucket for `key`, if one exists.
    pub fn bucket(&self, key: &str) -> Option<TokenBucket> {
        self.buckets.get(key).map(|bucket| bucket.clone())
    }

    /// Removes buckets that are full and untouched for `idle_ms`.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep_idle(&self, now_ms: u64, idle_ms: u64) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_idle(now_ms, idle_ms));
        before.saturating_sub(self.buckets.len())
    }

    /// Number of buckets currently held.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns true if no bucket is held.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Default for LocalBucketStore {
    fn default() -> Self {
        Self::new(16)
    }
}

impl std::fmt::Debug for LocalBucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBucketStore")
            .field("shards", &self.shard_amount)
            .field("buckets", &self.len())
            .finish()
    }
}

#[async_trait]
impl BucketStore for LocalBucketStore {
    async fn consume(
        &self,
        key: &str,
        policy: BucketPolicy,
        cost: u32,
        now_ms: u64,
    ) -> Result<Consumption, StoreError> {
        Ok(self.consume_now(key, policy, cost, now_ms))
    }

    fn name(&self) -> &str {
        "local"
    }
}
