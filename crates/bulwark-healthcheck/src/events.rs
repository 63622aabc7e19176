use crate::HealthStatus;
use bulwark_core::ComponentEvent;
use std::time::Instant;

/// Events emitted by the health aggregator.
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// The overall status changed between two aggregations.
    StatusChanged {
        component: String,
        timestamp: Instant,
        from: HealthStatus,
        to: HealthStatus,
    },
    /// A component check exceeded its timeout.
    CheckTimedOut {
        component: String,
        timestamp: Instant,
        check: String,
    },
}

impl ComponentEvent for HealthEvent {
    fn kind(&self) -> &'static str {
        match self {
            HealthEvent::StatusChanged { .. } => "health_status_changed",
            HealthEvent::CheckTimedOut { .. } => "health_check_timed_out",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            HealthEvent::StatusChanged { timestamp, .. }
            | HealthEvent::CheckTimedOut { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            HealthEvent::StatusChanged { component, .. }
            | HealthEvent::CheckTimedOut { component, .. } => component,
        }
    }
}
