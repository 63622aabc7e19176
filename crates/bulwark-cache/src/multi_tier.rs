//! Local + distributed cache composition.
//!
//! Reads try the local tier, then the distributed tier, copying distributed
//! hits into the local tier. Writes go to the distributed tier first (the
//! tier of record), then the local tier. When the distributed tier is down
//! the cache keeps working from memory and reports writes as
//! [`WriteOutcome::Degraded`]; callers only see [`CacheError::Unavailable`]
//! when the local tier fails as well.
//!
//! A clear that only reached the local tier is replayed on the distributed
//! tier before it is read from or written to again, so entries from before
//! the clear are never copied back into memory.

use crate::adapter::{CacheAdapter, CacheStats, WriteOutcome};
use crate::distributed::DistributedCache;
use crate::entry::Tier;
use crate::error::CacheError;
use crate::events::CacheEvent;
use crate::memory::MemoryCache;
use async_trait::async_trait;
use bulwark_core::{EventListeners, FnListener};
use bytes::Bytes;
use hashbrown::HashMap;
#[cfg(feature = "metrics")]
use metrics::counter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Whether the distributed tier is currently serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TierMode {
    /// Both tiers are in use.
    Full,
    /// The distributed tier is failing or its circuit is open; reads and
    /// writes are served from memory.
    MemoryOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Set(Option<Duration>),
    Delete,
}

/// Builder for [`MultiTierCache`].
pub struct MultiTierCacheBuilder {
    name: String,
    local: Arc<dyn CacheAdapter>,
    local_ttl: Option<Duration>,
    distributed: DistributedCache,
    listeners: EventListeners<CacheEvent>,
}

impl MultiTierCacheBuilder {
    /// Names the cache.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Caps the TTL of entries copied from the distributed tier into the
    /// local tier. Backfilled entries live for the shorter of this and the
    /// distributed entry's remaining TTL.
    pub fn local_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.local_ttl = ttl;
        self
    }

    /// Registers a callback for writes that only reached the local tier.
    pub fn on_degraded_write<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners
            .add(FnListener::new(move |event: &CacheEvent| {
                if let CacheEvent::DegradedWrite { key, .. } = event {
                    f(key);
                }
            }));
        self
    }

    /// Registers a callback for every cache event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(f));
        self
    }

    /// Builds the cache.
    pub fn build(self) -> MultiTierCache {
        #[cfg(feature = "metrics")]
        crate::describe_metrics();

        MultiTierCache {
            name: self.name,
            local: self.local,
            local_ttl: self.local_ttl,
            distributed: self.distributed,
            pending: Mutex::new(HashMap::new()),
            clear_pending: AtomicBool::new(false),
            clear_gate: AsyncMutex::new(()),
            distributed_failing: AtomicBool::new(false),
            listeners: self.listeners,
            local_hits: AtomicU64::new(0),
            distributed_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            backfills: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            degraded_writes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

/// Two-tier cache: a local tier in front of a distributed tier.
pub struct MultiTierCache {
    name: String,
    local: Arc<dyn CacheAdapter>,
    local_ttl: Option<Duration>,
    distributed: DistributedCache,
    pending: Mutex<HashMap<String, Pending>>,
    clear_pending: AtomicBool,
    clear_gate: AsyncMutex<()>,
    distributed_failing: AtomicBool,
    listeners: EventListeners<CacheEvent>,
    local_hits: AtomicU64,
    distributed_hits: AtomicU64,
    misses: AtomicU64,
    backfills: AtomicU64,
    writes: AtomicU64,
    degraded_writes: AtomicU64,
    errors: AtomicU64,
}

impl MultiTierCache {
    /// Composes a memory tier and a distributed tier. The memory tier's
    /// default TTL caps backfilled entries.
    pub fn new(local: MemoryCache, distributed: DistributedCache) -> Self {
        let local_ttl = local.default_ttl();
        Self::builder(Arc::new(local), distributed)
            .local_ttl(local_ttl)
            .build()
    }

    /// Starts building a cache over any local adapter.
    pub fn builder(
        local: Arc<dyn CacheAdapter>,
        distributed: DistributedCache,
    ) -> MultiTierCacheBuilder {
        MultiTierCacheBuilder {
            name: String::from("multi_tier"),
            local,
            local_ttl: None,
            distributed,
            listeners: EventListeners::new(),
        }
    }

    /// The distributed tier.
    pub fn distributed(&self) -> &DistributedCache {
        &self.distributed
    }

    /// The local tier.
    pub fn local(&self) -> &Arc<dyn CacheAdapter> {
        &self.local
    }

    /// Whether the distributed tier is currently serving.
    pub fn mode(&self) -> TierMode {
        if self.distributed.breaker().is_open() || self.distributed_failing.load(Ordering::Acquire)
        {
            TierMode::MemoryOnly
        } else {
            TierMode::Full
        }
    }

    /// Number of degraded writes waiting for [`Self::reconcile_pending`],
    /// counting a degraded clear as one.
    pub fn pending_writes(&self) -> usize {
        self.pending.lock().len() + usize::from(self.clear_pending.load(Ordering::Acquire))
    }

    /// Pushes degraded writes to the distributed tier.
    ///
    /// A degraded clear is replayed first. Sets re-send the value currently
    /// held locally; keys that have since expired locally are dropped. Stops
    /// at the first distributed failure, leaving the remaining writes pending.
    pub async fn reconcile_pending(&self) -> Result<usize, CacheError> {
        let mut repaired = match self.replay_clear().await {
            Ok(replayed) => usize::from(replayed),
            Err(err) => {
                self.note_distributed(false);
                return Err(err);
            }
        };

        let snapshot: Vec<(String, Pending)> = self
            .pending
            .lock()
            .iter()
            .map(|(key, pending)| (key.clone(), *pending))
            .collect();

        for (key, pending) in snapshot {
            let result = match pending {
                Pending::Set(ttl) => match self.local.get(&key).await {
                    Ok(Some(value)) => self.distributed.set(&key, value, ttl).await.map(|_| ()),
                    Ok(None) => Ok(()),
                    Err(err) => Err(err),
                },
                Pending::Delete => self.distributed.delete(&key).await.map(|_| ()),
            };

            match result {
                Ok(()) => {
                    self.clear_pending(&key, pending);
                    repaired += 1;
                }
                Err(err) => {
                    self.note_distributed(false);
                    return Err(err);
                }
            }
        }

        if repaired > 0 {
            self.note_distributed(true);

            #[cfg(feature = "tracing")]
            tracing::info!(cache = %self.name, repaired, "reconciled degraded writes");
        }
        Ok(repaired)
    }

    /// Spawns a task that calls [`Self::reconcile_pending`] every `interval`
    /// while writes are pending. The task exits once the cache is dropped.
    pub fn spawn_reconciler(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                if cache.pending_writes() > 0 {
                    if let Err(err) = cache.reconcile_pending().await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            cache = %cache.name,
                            error = %err,
                            pending = cache.pending_writes(),
                            "reconcile failed, retrying next tick"
                        );

                        #[cfg(not(feature = "tracing"))]
                        let _ = err;
                    }
                }
            }
        })
    }

    /// Replays a degraded clear on the distributed tier, if one is waiting.
    /// Returns whether a clear was replayed.
    async fn replay_clear(&self) -> Result<bool, CacheError> {
        if !self.clear_pending.load(Ordering::Acquire) {
            return Ok(false);
        }
        let _gate = self.clear_gate.lock().await;
        if !self.clear_pending.load(Ordering::Acquire) {
            return Ok(false);
        }

        self.distributed.clear().await?;
        self.clear_pending.store(false, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::info!(cache = %self.name, "replayed degraded clear on distributed tier");

        Ok(true)
    }

    fn clear_pending(&self, key: &str, expected: Pending) {
        let mut pending = self.pending.lock();
        if pending.get(key) == Some(&expected) {
            pending.remove(key);
        }
    }

    fn note_distributed(&self, healthy: bool) {
        let was_failing = self.distributed_failing.swap(!healthy, Ordering::AcqRel);

        #[cfg(feature = "tracing")]
        {
            if was_failing && healthy {
                tracing::info!(cache = %self.name, "distributed tier recovered");
            } else if !was_failing && !healthy {
                tracing::warn!(cache = %self.name, "distributed tier failing, serving from memory");
            }
        }

        #[cfg(not(feature = "tracing"))]
        let _ = was_failing;
    }

    fn tier_failure(&self, tier: Tier, err: &CacheError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if tier == Tier::Distributed {
            self.note_distributed(false);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(cache = %self.name, tier = tier.as_str(), error = %err, "cache tier failed");

        self.listeners.emit(&CacheEvent::TierFailure {
            component: self.name.clone(),
            timestamp: Instant::now(),
            tier,
            reason: err.to_string(),
        });
    }

    fn record_hit(&self, tier: Tier) {
        match tier {
            Tier::Local => self.local_hits.fetch_add(1, Ordering::Relaxed),
            Tier::Distributed => self.distributed_hits.fetch_add(1, Ordering::Relaxed),
        };

        #[cfg(feature = "metrics")]
        counter!("cache_requests_total", "cache" => self.name.clone(), "result" => "hit", "tier" => tier.as_str())
            .increment(1);

        self.listeners.emit_with(|| CacheEvent::Hit {
            component: self.name.clone(),
            timestamp: Instant::now(),
            tier,
        });
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        counter!("cache_requests_total", "cache" => self.name.clone(), "result" => "miss")
            .increment(1);

        self.listeners.emit_with(|| CacheEvent::Miss {
            component: self.name.clone(),
            timestamp: Instant::now(),
        });
    }

    fn record_degraded(&self, key: &str, pending: Pending, err: &CacheError) {
        self.pending.lock().insert(key.to_string(), pending);
        self.degraded_writes.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        counter!("cache_degraded_writes_total", "cache" => self.name.clone()).increment(1);

        self.listeners.emit(&CacheEvent::DegradedWrite {
            component: self.name.clone(),
            timestamp: Instant::now(),
            key: key.to_string(),
            reason: err.to_string(),
        });
    }

    async fn backfill(&self, key: &str, value: Bytes, remote_ttl: Option<Duration>) {
        let ttl = match (remote_ttl, self.local_ttl) {
            (Some(remote), Some(local)) => Some(remote.min(local)),
            (remote, local) => remote.or(local),
        };
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return;
        }

        match self.local.set(key, value, ttl).await {
            Ok(_) => {
                self.backfills.fetch_add(1, Ordering::Relaxed);
                self.listeners.emit(&CacheEvent::Backfilled {
                    component: self.name.clone(),
                    timestamp: Instant::now(),
                    key: key.to_string(),
                });
            }
            Err(err) => self.tier_failure(Tier::Local, &err),
        }
    }

    fn unavailable(&self, local: &CacheError, distributed: &CacheError) -> CacheError {
        CacheError::Unavailable {
            cache: self.name.clone(),
            reason: format!("local: {}; distributed: {}", local, distributed),
        }
    }
}

impl std::fmt::Debug for MultiTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTierCache")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("pending_writes", &self.pending_writes())
            .finish()
    }
}

#[async_trait]
impl CacheAdapter for MultiTierCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let local_err = match self.local.get(key).await {
            Ok(Some(value)) => {
                self.record_hit(Tier::Local);
                return Ok(Some(value));
            }
            Ok(None) => None,
            Err(err) => {
                self.tier_failure(Tier::Local, &err);
                Some(err)
            }
        };

        let remote = match self.replay_clear().await {
            Ok(_) => self.distributed.get_with_ttl(key).await,
            Err(err) => Err(err),
        };

        match remote {
            Ok(Some(remote)) => {
                self.note_distributed(true);
                if local_err.is_none() {
                    self.backfill(key, remote.value.clone(), remote.ttl).await;
                }
                self.record_hit(Tier::Distributed);
                Ok(Some(remote.value))
            }
            Ok(None) => {
                self.note_distributed(true);
                self.record_miss();
                Ok(None)
            }
            Err(err) => {
                self.tier_failure(Tier::Distributed, &err);
                match local_err {
                    Some(local_err) => Err(self.unavailable(&local_err, &err)),
                    None => {
                        self.record_miss();
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome, CacheError> {
        let remote = match self.replay_clear().await {
            Ok(_) => self.distributed.set(key, value.clone(), ttl).await,
            Err(err) => Err(err),
        };
        let local = self.local.set(key, value, ttl).await;

        match (remote, local) {
            (Ok(_), Ok(_)) => {
                self.note_distributed(true);
                self.pending.lock().remove(key);
                self.writes.fetch_add(1, Ordering::Relaxed);
                Ok(WriteOutcome::Stored)
            }
            (Ok(_), Err(local_err)) => {
                self.note_distributed(true);
                self.pending.lock().remove(key);
                self.tier_failure(Tier::Local, &local_err);
                // Drop any stale local copy so reads go to the fresh value.
                let _ = self.local.delete(key).await;
                self.writes.fetch_add(1, Ordering::Relaxed);
                Ok(WriteOutcome::Stored)
            }
            (Err(remote_err), Ok(_)) => {
                self.tier_failure(Tier::Distributed, &remote_err);
                self.record_degraded(key, Pending::Set(ttl), &remote_err);
                self.writes.fetch_add(1, Ordering::Relaxed);
                Ok(WriteOutcome::Degraded)
            }
            (Err(remote_err), Err(local_err)) => {
                self.tier_failure(Tier::Distributed, &remote_err);
                self.tier_failure(Tier::Local, &local_err);
                Err(self.unavailable(&local_err, &remote_err))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<WriteOutcome, CacheError> {
        let remote = match self.replay_clear().await {
            Ok(_) => self.distributed.delete(key).await,
            Err(err) => Err(err),
        };
        let local = self.local.delete(key).await;

        match (remote, local) {
            (Ok(_), Ok(_)) => {
                self.note_distributed(true);
                self.pending.lock().remove(key);
                Ok(WriteOutcome::Stored)
            }
            (Ok(_), Err(local_err)) => {
                self.note_distributed(true);
                self.pending.lock().remove(key);
                self.tier_failure(Tier::Local, &local_err);
                Ok(WriteOutcome::Stored)
            }
            (Err(remote_err), Ok(_)) => {
                self.tier_failure(Tier::Distributed, &remote_err);
                self.record_degraded(key, Pending::Delete, &remote_err);
                Ok(WriteOutcome::Degraded)
            }
            (Err(remote_err), Err(local_err)) => {
                self.tier_failure(Tier::Distributed, &remote_err);
                self.tier_failure(Tier::Local, &local_err);
                Err(self.unavailable(&local_err, &remote_err))
            }
        }
    }

    async fn clear(&self) -> Result<WriteOutcome, CacheError> {
        let remote = {
            let _gate = self.clear_gate.lock().await;
            let remote = self.distributed.clear().await;
            if remote.is_ok() {
                self.clear_pending.store(false, Ordering::Release);
            }
            remote
        };
        let local = self.local.clear().await;

        match (remote, local) {
            (Ok(_), local) => {
                self.note_distributed(true);
                self.pending.lock().clear();
                if let Err(local_err) = local {
                    self.tier_failure(Tier::Local, &local_err);
                }
                Ok(WriteOutcome::Stored)
            }
            (Err(remote_err), Ok(_)) => {
                self.tier_failure(Tier::Distributed, &remote_err);
                // The replayed clear supersedes every earlier degraded write.
                self.pending.lock().clear();
                self.clear_pending.store(true, Ordering::Release);
                self.degraded_writes.fetch_add(1, Ordering::Relaxed);
                self.listeners.emit(&CacheEvent::DegradedWrite {
                    component: self.name.clone(),
                    timestamp: Instant::now(),
                    key: String::from("*"),
                    reason: remote_err.to_string(),
                });
                Ok(WriteOutcome::Degraded)
            }
            (Err(remote_err), Err(local_err)) => {
                self.tier_failure(Tier::Distributed, &remote_err);
                self.tier_failure(Tier::Local, &local_err);
                Err(self.unavailable(&local_err, &remote_err))
            }
        }
    }

    async fn reconcile(&self) -> Result<usize, CacheError> {
        self.reconcile_pending().await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            degraded_writes: self.degraded_writes.load(Ordering::Relaxed),
            evictions: self.local.stats().evictions,
            errors: self.errors.load(Ordering::Relaxed),
            entries: self.local.stats().entries,
        }
    }
}
