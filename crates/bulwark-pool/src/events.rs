use bulwark_core::ComponentEvent;
use std::time::{Duration, Instant};

/// Why a pooled connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Idle longer than the idle timeout.
    IdleTimeout,
    /// Failed validation before reuse.
    ValidationFailed,
    /// Discarded by the caller holding it.
    Discarded,
    /// The pool was closed.
    PoolClosed,
}

impl CloseReason {
    /// Returns a static label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::ValidationFailed => "validation_failed",
            CloseReason::Discarded => "discarded",
            CloseReason::PoolClosed => "pool_closed",
        }
    }
}

/// Events emitted by the connection pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A new connection was opened.
    ConnectionCreated {
        component: String,
        timestamp: Instant,
        total: usize,
    },
    /// A connection was closed.
    ConnectionClosed {
        component: String,
        timestamp: Instant,
        reason: CloseReason,
    },
    /// A caller gave up waiting for a connection.
    AcquireTimedOut {
        component: String,
        timestamp: Instant,
        waited: Duration,
    },
}

impl ComponentEvent for PoolEvent {
    fn kind(&self) -> &'static str {
        match self {
            PoolEvent::ConnectionCreated { .. } => "connection_created",
            PoolEvent::ConnectionClosed { .. } => "connection_closed",
            PoolEvent::AcquireTimedOut { .. } => "acquire_timed_out",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            PoolEvent::ConnectionCreated { timestamp, .. }
            | PoolEvent::ConnectionClosed { timestamp, .. }
            | PoolEvent::AcquireTimedOut { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            PoolEvent::ConnectionCreated { component, .. }
            | PoolEvent::ConnectionClosed { component, .. }
            | PoolEvent::AcquireTimedOut { component, .. } => component,
        }
    }
}
