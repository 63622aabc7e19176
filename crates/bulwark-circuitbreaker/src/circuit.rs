use crate::config::CircuitBreakerConfig;
use std::time::{Duration, Instant};

/// Represents the state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[repr(u8)]
pub enum CircuitState {
    /// The circuit is closed and calls are allowed.
    Closed = 0,
    /// The circuit is open and calls are rejected.
    Open = 1,
    /// The circuit is half-open and a limited number of trial calls are allowed.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Returns a static label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Snapshot of circuit breaker counters for observability.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CircuitMetrics {
    /// Current state of the circuit breaker.
    pub state: CircuitState,
    /// Failures in the current closed-state streak, or 0.
    pub consecutive_failures: u32,
    /// Successes recorded in the current half-open trial.
    pub consecutive_successes: u32,
    /// Trial calls currently in flight while half-open.
    pub half_open_in_flight: u32,
    /// Successful calls recorded over the breaker's lifetime.
    pub total_successes: u64,
    /// Failed calls recorded over the breaker's lifetime.
    pub total_failures: u64,
    /// Calls rejected without being attempted.
    pub total_rejections: u64,
    /// Time since the last state transition.
    pub time_since_state_change: Duration,
    /// Time until an open circuit admits a trial call, if open.
    pub remaining_open: Option<Duration>,
}

/// A state change produced by one of the circuit operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub(crate) from: CircuitState,
    pub(crate) to: CircuitState,
}

/// Outcome of asking the circuit for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The call may proceed. `generation` identifies the state it was
    /// admitted under.
    Permitted {
        state: CircuitState,
        generation: u64,
        transition: Option<Transition>,
    },
    /// Refused; `state` is why: open, or half-open with every trial slot
    /// taken.
    Rejected { state: CircuitState },
}

pub(crate) struct Circuit {
    state: CircuitState,
    /// Bumped on every transition so that outcomes of calls admitted under an
    /// earlier state do not feed the counters of the current one.
    generation: u64,
    last_state_change: Instant,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
    streak_started: Option<Instant>,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl Circuit {
    pub(crate) fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            last_state_change: Instant::now(),
            opened_at: None,
            consecutive_failures: 0,
            streak_started: None,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn metrics(&self, config: &CircuitBreakerConfig, now: Instant) -> CircuitMetrics {
        let remaining_open = match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                config
                    .reset_timeout
                    .saturating_sub(now.saturating_duration_since(opened_at)),
            ),
            _ => None,
        };

        CircuitMetrics {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            half_open_in_flight: self.half_open_in_flight,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            total_rejections: self.total_rejections,
            time_since_state_change: now.saturating_duration_since(self.last_state_change),
            remaining_open,
        }
    }

    pub(crate) fn try_acquire(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Permitted {
                state: CircuitState::Closed,
                generation: self.generation,
                transition: None,
            },
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|opened_at| now.saturating_duration_since(opened_at))
                    .unwrap_or(Duration::MAX);
                if elapsed >= config.reset_timeout {
                    let transition = self.transition_to(CircuitState::HalfOpen, now);
                    self.half_open_in_flight = 1;
                    Admission::Permitted {
                        state: CircuitState::HalfOpen,
                        generation: self.generation,
                        transition,
                    }
                } else {
                    self.total_rejections += 1;
                    Admission::Rejected {
                        state: CircuitState::Open,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_in_flight < config.half_open_max_calls {
                    self.half_open_in_flight += 1;
                    Admission::Permitted {
                        state: CircuitState::HalfOpen,
                        generation: self.generation,
                        transition: None,
                    }
                } else {
                    self.total_rejections += 1;
                    Admission::Rejected {
                        state: CircuitState::HalfOpen,
                    }
                }
            }
        }
    }

    pub(crate) fn record_success(
        &mut self,
        config: &CircuitBreakerConfig,
        generation: u64,
        now: Instant,
    ) -> Option<Transition> {
        self.total_successes += 1;
        if generation != self.generation {
            return None;
        }

        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.streak_started = None;
                None
            }
            CircuitState::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                self.consecutive_successes += 1;
                if self.consecutive_successes >= config.half_open_success_threshold {
                    self.transition_to(CircuitState::Closed, now)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    pub(crate) fn record_failure(
        &mut self,
        config: &CircuitBreakerConfig,
        generation: u64,
        now: Instant,
    ) -> Option<Transition> {
        self.total_failures += 1;
        if generation != self.generation {
            return None;
        }

        match self.state {
            CircuitState::Closed => {
                let streak_expired = self
                    .streak_started
                    .map(|started| now.saturating_duration_since(started) > config.rolling_window)
                    .unwrap_or(true);
                if streak_expired {
                    self.streak_started = Some(now);
                    self.consecutive_failures = 0;
                }
                self.consecutive_failures += 1;

                if self.consecutive_failures >= config.failure_threshold {
                    self.transition_to(CircuitState::Open, now)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open, now),
            CircuitState::Open => None,
        }
    }

    /// Releases a half-open trial slot for a call that was admitted but never
    /// reported an outcome (the caller dropped its future).
    pub(crate) fn abandon(&mut self, generation: u64) {
        if generation == self.generation && self.state == CircuitState::HalfOpen {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }
    }

    pub(crate) fn force(&mut self, state: CircuitState, now: Instant) -> Option<Transition> {
        self.transition_to(state, now)
    }

    fn transition_to(&mut self, state: CircuitState, now: Instant) -> Option<Transition> {
        if self.state == state {
            return None;
        }

        let from = self.state;
        self.state = state;
        self.generation += 1;
        self.last_state_change = now;
        self.opened_at = (state == CircuitState::Open).then_some(now);
        self.consecutive_failures = 0;
        self.streak_started = None;
        self.consecutive_successes = 0;
        self.half_open_in_flight = 0;

        Some(Transition { from, to: state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CircuitBreakerConfig;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .reset_timeout(Duration::from_millis(100))
            .half_open_success_threshold(2)
            .into_config()
    }

    fn permit(circuit: &mut Circuit, config: &CircuitBreakerConfig, now: Instant) -> u64 {
        match circuit.try_acquire(config, now) {
            Admission::Permitted { generation, .. } => generation,
            Admission::Rejected { .. } => panic!("expected call to be permitted"),
        }
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let config = config(3);
        let mut circuit = Circuit::new();
        let now = Instant::now();

        for _ in 0..2 {
            let g = permit(&mut circuit, &config, now);
            assert!(circuit.record_failure(&config, g, now).is_none());
        }
        let g = permit(&mut circuit, &config, now);
        let transition = circuit.record_failure(&config, g, now);

        assert_eq!(
            transition,
            Some(Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open
            })
        );
        assert_eq!(
            circuit.try_acquire(&config, now),
            Admission::Rejected {
                state: CircuitState::Open
            }
        );
    }

    #[test]
    fn success_resets_failure_streak() {
        let config = config(3);
        let mut circuit = Circuit::new();
        let now = Instant::now();

        for _ in 0..2 {
            let g = permit(&mut circuit, &config, now);
            circuit.record_failure(&config, g, now);
        }
        let g = permit(&mut circuit, &config, now);
        circuit.record_success(&config, g, now);
        for _ in 0..2 {
            let g = permit(&mut circuit, &config, now);
            circuit.record_failure(&config, g, now);
        }

        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn failures_outside_rolling_window_restart_the_streak() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .rolling_window(Duration::from_secs(1))
            .into_config();
        let mut circuit = Circuit::new();
        let start = Instant::now();

        let g = permit(&mut circuit, &config, start);
        circuit.record_failure(&config, g, start);

        let later = start + Duration::from_secs(5);
        let g = permit(&mut circuit, &config, later);
        circuit.record_failure(&config, g, later);

        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics(&config, later).consecutive_failures, 1);
    }

    #[test]
    fn half_open_after_reset_timeout_then_closes() {
        let config = config(1);
        let mut circuit = Circuit::new();
        let start = Instant::now();

        let g = permit(&mut circuit, &config, start);
        circuit.record_failure(&config, g, start);
        assert_eq!(circuit.state(), CircuitState::Open);

        let later = start + Duration::from_millis(150);
        let first = circuit.try_acquire(&config, later);
        let Admission::Permitted {
            state,
            generation,
            transition,
        } = first
        else {
            panic!("expected trial call");
        };
        assert_eq!(state, CircuitState::HalfOpen);
        assert!(transition.is_some());

        assert!(circuit.record_success(&config, generation, later).is_none());
        let g = permit(&mut circuit, &config, later);
        let closed = circuit.record_success(&config, g, later);
        assert_eq!(closed.map(|t| t.to), Some(CircuitState::Closed));
    }

    #[test]
    fn failure_in_half_open_reopens() {
        let config = config(1);
        let mut circuit = Circuit::new();
        let start = Instant::now();

        let g = permit(&mut circuit, &config, start);
        circuit.record_failure(&config, g, start);

        let later = start + Duration::from_millis(150);
        let g = permit(&mut circuit, &config, later);
        let reopened = circuit.record_failure(&config, g, later);
        assert_eq!(reopened.map(|t| t.to), Some(CircuitState::Open));

        // opened_at was reset, so the circuit stays open for another timeout
        let soon = later + Duration::from_millis(50);
        assert_eq!(
            circuit.try_acquire(&config, soon),
            Admission::Rejected {
                state: CircuitState::Open
            }
        );
    }

    #[test]
    fn half_open_limits_trial_calls() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .reset_timeout(Duration::from_millis(10))
            .half_open_max_calls(1)
            .into_config();
        let mut circuit = Circuit::new();
        let start = Instant::now();

        let g = permit(&mut circuit, &config, start);
        circuit.record_failure(&config, g, start);

        let later = start + Duration::from_millis(20);
        let g = permit(&mut circuit, &config, later);
        assert_eq!(
            circuit.try_acquire(&config, later),
            Admission::Rejected {
                state: CircuitState::HalfOpen
            }
        );

        circuit.abandon(g);
        assert!(matches!(
            circuit.try_acquire(&config, later),
            Admission::Permitted { .. }
        ));
    }

    #[test]
    fn stale_outcomes_do_not_move_counters() {
        let config = config(2);
        let mut circuit = Circuit::new();
        let now = Instant::now();

        let stale = permit(&mut circuit, &config, now);
        circuit.force(CircuitState::Open, now);
        circuit.force(CircuitState::Closed, now);

        assert!(circuit.record_failure(&config, stale, now).is_none());
        assert_eq!(circuit.metrics(&config, now).consecutive_failures, 0);
        assert_eq!(circuit.metrics(&config, now).total_failures, 1);
    }
}
