//! Event types for cache adapters.

use crate::entry::Tier;
use bulwark_core::ComponentEvent;
use std::time::Instant;

/// Events emitted by the multi-tier cache.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A read was served by a tier.
    Hit {
        component: String,
        timestamp: Instant,
        tier: Tier,
    },
    /// A read found nothing in any tier.
    Miss {
        component: String,
        timestamp: Instant,
    },
    /// A distributed hit was copied into the local tier.
    Backfilled {
        component: String,
        timestamp: Instant,
        key: String,
    },
    /// A write reached the local tier only.
    DegradedWrite {
        component: String,
        timestamp: Instant,
        key: String,
        reason: String,
    },
    /// A tier operation failed and was absorbed.
    TierFailure {
        component: String,
        timestamp: Instant,
        tier: Tier,
        reason: String,
    },
}

impl ComponentEvent for CacheEvent {
    fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "cache_hit",
            CacheEvent::Miss { .. } => "cache_miss",
            CacheEvent::Backfilled { .. } => "cache_backfilled",
            CacheEvent::DegradedWrite { .. } => "cache_degraded_write",
            CacheEvent::TierFailure { .. } => "cache_tier_failure",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CacheEvent::Hit { timestamp, .. }
            | CacheEvent::Miss { timestamp, .. }
            | CacheEvent::Backfilled { timestamp, .. }
            | CacheEvent::DegradedWrite { timestamp, .. }
            | CacheEvent::TierFailure { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            CacheEvent::Hit { component, .. }
            | CacheEvent::Miss { component, .. }
            | CacheEvent::Backfilled { component, .. }
            | CacheEvent::DegradedWrite { component, .. }
            | CacheEvent::TierFailure { component, .. } => component,
        }
    }
}
