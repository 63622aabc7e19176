//! Per-key token-bucket rate limiting.
//!
//! Each key (a user id, a client IP, an API key) gets its own token bucket.
//! Buckets refill lazily at each check, so idle keys cost nothing but memory,
//! and an idle sweep reclaims that too.
//!
//! # Policies
//!
//! The part of a key before the first `:` selects a policy. With a `user`
//! policy configured, `user:42` and `user:43` get independent buckets sized
//! by that policy; keys with an unknown prefix use the default policy.
//!
//! # Coordination across processes
//!
//! Built with [`RateLimiterConfigBuilder::try_build_with_store`], the
//! limiter delegates the atomic refill-and-consume step to a shared
//! [`BucketStore`] under a short timeout. If the store errors or times out,
//! that check is enforced by the local store instead and the decision is
//! marked `degraded`: each instance then enforces the budget on its own,
//! which under-enforces during an outage rather than failing open or closed.
//!
//! # Examples
//!
//! ```
//! use bulwark_ratelimiter::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::builder()
//!     .name("api")
//!     .default_policy(100, 10.0)
//!     .policy("user", 5, 1.0)
//!     .build();
//!
//! let decision = limiter.check("user:42").await;
//! if !decision.allowed {
//!     for (name, value) in decision.headers() {
//!         println!("{}: {}", name, value);
//!     }
//! }
//! # }
//! ```

mod bucket;
mod config;
mod decision;
mod error;
mod events;
mod layer;
mod store;

pub use bucket::{BucketPolicy, Consumption, TokenBucket, MAX_WAIT};
pub use config::{RateLimiterConfig, RateLimiterConfigBuilder};
pub use decision::RateLimitDecision;
pub use error::{ConfigError, RateLimiterError, StoreError};
pub use events::RateLimiterEvent;
pub use layer::{RateLimitLayer, RateLimitService};
pub use store::{BucketStore, LocalBucketStore};

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
#[cfg(feature = "metrics")]
use std::sync::Once;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

#[cfg(feature = "metrics")]
fn describe_metrics() {
    METRICS_INIT.call_once(|| {
        describe_counter!(
            "ratelimiter_checks_total",
            "Total number of rate limit checks by outcome"
        );
        describe_counter!(
            "ratelimiter_store_fallbacks_total",
            "Checks enforced locally because the shared store was unavailable"
        );
    });
}

/// Counters describing limiter activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RateLimiterStats {
    /// Checks that were admitted.
    pub allowed: u64,
    /// Checks that were denied.
    pub denied: u64,
    /// Checks enforced locally after a shared-store failure.
    pub store_fallbacks: u64,
    /// Buckets currently held in the local store.
    pub local_buckets: usize,
}

struct Inner {
    config: RateLimiterConfig,
    local: LocalBucketStore,
    shared: Option<Arc<dyn BucketStore>>,
    allowed: AtomicU64,
    denied: AtomicU64,
    fallbacks: AtomicU64,
}

/// Token-bucket rate limiter keyed by string.
///
/// Cloning is cheap; clones share buckets and counters.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub(crate) fn new(config: RateLimiterConfig, shared: Option<Arc<dyn BucketStore>>) -> Self {
        #[cfg(feature = "metrics")]
        describe_metrics();

        Self {
            inner: Arc::new(Inner {
                local: LocalBucketStore::new(config.shards),
                config,
                shared,
                allowed: AtomicU64::new(0),
                denied: AtomicU64::new(0),
                fallbacks: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a new configuration builder.
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    /// Name of this limiter.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.inner.config
    }

    /// Returns true if a shared store is configured.
    pub fn is_distributed(&self) -> bool {
        self.inner.shared.is_some()
    }

    /// Checks `key` at a cost of one token.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_n(key, 1).await
    }

    /// Checks `key` at a cost of `cost` tokens.
    pub async fn check_n(&self, key: &str, cost: u32) -> RateLimitDecision {
        let policy = self.inner.config.policy_for(key);
        let now = SystemTime::now();
        let now_ms = unix_millis(now);

        let (consumption, degraded) = match &self.inner.shared {
            None => (self.inner.local.consume_now(key, policy, cost, now_ms), false),
            Some(store) => {
                let timeout = self.inner.config.store_timeout;
                let result = tokio::time::timeout(timeout, store.consume(key, policy, cost, now_ms))
                    .await
                    .unwrap_or(Err(StoreError::Timeout(timeout)));
                match result {
                    Ok(consumption) => (consumption, false),
                    Err(err) => {
                        self.record_fallback(key, store.name(), &err);
                        (self.inner.local.consume_now(key, policy, cost, now_ms), true)
                    }
                }
            }
        };

        // Shared stores may report any wait.
        let wait = consumption.wait.min(MAX_WAIT);
        let decision = RateLimitDecision {
            allowed: consumption.allowed,
            limit: policy.capacity,
            remaining: consumption.remaining.max(0.0).floor() as u32,
            reset_at: now + wait,
            retry_after: (!consumption.allowed).then_some(wait),
            degraded,
        };
        self.record_decision(key, &decision);
        decision
    }

    /// Checks `key` at a cost of one token, returning an error when denied.
    pub async fn acquire(&self, key: &str) -> Result<RateLimitDecision, RateLimiterError> {
        self.acquire_n(key, 1).await
    }

    /// Checks `key` at a cost of `cost` tokens, returning an error when
    /// denied.
    pub async fn acquire_n(
        &self,
        key: &str,
        cost: u32,
    ) -> Result<RateLimitDecision, RateLimiterError> {
        let decision = self.check_n(key, cost).await;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(RateLimiterError::RateLimitExceeded {
                key: key.to_string(),
                retry_after: decision.retry_after.unwrap_or_default(),
                reset_at: decision.reset_at,
            })
        }
    }

    /// Removes local buckets that are full and untouched for `max_idle`.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let removed = self.inner.local.sweep_idle(
            unix_millis(SystemTime::now()),
            max_idle.as_millis() as u64,
        );

        #[cfg(feature = "tracing")]
        if removed > 0 {
            tracing::debug!(ratelimiter = %self.inner.config.name, removed, "swept idle buckets");
        }

        removed
    }

    /// Spawns a task that runs [`Self::sweep_idle`] every `interval`.
    ///
    /// The task holds a weak reference and exits once every clone of the
    /// limiter has been dropped.
    pub fn spawn_sweeper(&self, interval: Duration, max_idle: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        RateLimiter { inner }.sweep_idle(max_idle);
                    }
                    None => break,
                }
            }
        })
    }

    /// Returns activity counters.
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            allowed: self.inner.allowed.load(Ordering::Relaxed),
            denied: self.inner.denied.load(Ordering::Relaxed),
            store_fallbacks: self.inner.fallbacks.load(Ordering::Relaxed),
            local_buckets: self.inner.local.len(),
        }
    }

    fn record_fallback(&self, key: &str, store: &str, err: &StoreError) {
        self.inner.fallbacks.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::warn!(
            ratelimiter = %self.inner.config.name,
            store,
            error = %err,
            "shared bucket store unavailable, enforcing locally"
        );

        #[cfg(feature = "metrics")]
        counter!("ratelimiter_store_fallbacks_total", "ratelimiter" => self.inner.config.name.clone())
            .increment(1);

        #[cfg(not(feature = "tracing"))]
        let _ = store;

        self.inner
            .config
            .event_listeners
            .emit(&RateLimiterEvent::StoreFallback {
                component: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                key: key.to_string(),
                reason: err.to_string(),
            });
    }

    fn record_decision(&self, key: &str, decision: &RateLimitDecision) {
        let event = if decision.allowed {
            self.inner.allowed.fetch_add(1, Ordering::Relaxed);
            RateLimiterEvent::Allowed {
                component: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                key: key.to_string(),
                remaining: decision.remaining,
            }
        } else {
            self.inner.denied.fetch_add(1, Ordering::Relaxed);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                ratelimiter = %self.inner.config.name,
                key,
                retry_after_ms = decision.retry_after.unwrap_or_default().as_millis() as u64,
                "rate limit exceeded"
            );

            RateLimiterEvent::Denied {
                component: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                key: key.to_string(),
                retry_after: decision.retry_after.unwrap_or_default(),
            }
        };

        #[cfg(feature = "metrics")]
        counter!(
            "ratelimiter_checks_total",
            "ratelimiter" => self.inner.config.name.clone(),
            "outcome" => if decision.allowed { "allowed" } else { "denied" }
        )
        .increment(1);

        self.inner.config.event_listeners.emit(&event);
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.inner.config.name)
            .field("distributed", &self.is_distributed())
            .finish()
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
