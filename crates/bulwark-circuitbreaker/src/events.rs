use crate::CircuitState;
use bulwark_core::ComponentEvent;
use std::time::Instant;

/// How a finished call was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Counted toward closing (or keeping closed) the circuit.
    Success,
    /// Counted toward opening the circuit.
    Failure,
}

/// What a breaker reports to its listeners.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// A call got a permit. `state` is the state it was admitted under.
    Admitted {
        component: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A call was refused without running: the circuit is open, or every
    /// half-open trial slot is taken.
    ShortCircuited {
        component: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A permitted call finished and was counted.
    Recorded {
        component: String,
        timestamp: Instant,
        state: CircuitState,
        outcome: CallOutcome,
    },
    /// The circuit changed state. `forced` is set for `force_open` and
    /// `force_closed`.
    Transitioned {
        component: String,
        timestamp: Instant,
        from: CircuitState,
        to: CircuitState,
        forced: bool,
    },
}

impl ComponentEvent for CircuitBreakerEvent {
    fn kind(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::Admitted { .. } => "breaker_admitted",
            CircuitBreakerEvent::ShortCircuited { .. } => "breaker_short_circuited",
            CircuitBreakerEvent::Recorded {
                outcome: CallOutcome::Success,
                ..
            } => "breaker_success",
            CircuitBreakerEvent::Recorded {
                outcome: CallOutcome::Failure,
                ..
            } => "breaker_failure",
            CircuitBreakerEvent::Transitioned { .. } => "breaker_transitioned",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::Admitted { timestamp, .. }
            | CircuitBreakerEvent::ShortCircuited { timestamp, .. }
            | CircuitBreakerEvent::Recorded { timestamp, .. }
            | CircuitBreakerEvent::Transitioned { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            CircuitBreakerEvent::Admitted { component, .. }
            | CircuitBreakerEvent::ShortCircuited { component, .. }
            | CircuitBreakerEvent::Recorded { component, .. }
            | CircuitBreakerEvent::Transitioned { component, .. } => component,
        }
    }
}
