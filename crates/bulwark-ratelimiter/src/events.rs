use bulwark_core::ComponentEvent;
use std::time::{Duration, Instant};

/// Events emitted by the rate limiter.
#[derive(Debug, Clone)]
pub enum RateLimiterEvent {
    /// A check consumed tokens.
    Allowed {
        component: String,
        timestamp: Instant,
        key: String,
        remaining: u32,
    },
    /// A check was denied.
    Denied {
        component: String,
        timestamp: Instant,
        key: String,
        retry_after: Duration,
    },
    /// The shared store failed and the check was enforced locally.
    StoreFallback {
        component: String,
        timestamp: Instant,
        key: String,
        reason: String,
    },
}

impl ComponentEvent for RateLimiterEvent {
    fn kind(&self) -> &'static str {
        match self {
            RateLimiterEvent::Allowed { .. } => "allowed",
            RateLimiterEvent::Denied { .. } => "denied",
            RateLimiterEvent::StoreFallback { .. } => "store_fallback",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimiterEvent::Allowed { timestamp, .. }
            | RateLimiterEvent::Denied { timestamp, .. }
            | RateLimiterEvent::StoreFallback { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            RateLimiterEvent::Allowed { component, .. }
            | RateLimiterEvent::Denied { component, .. }
            | RateLimiterEvent::StoreFallback { component, .. } => component,
        }
    }
}
