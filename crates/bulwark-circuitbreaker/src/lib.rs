//! Circuit breaker for guarding named backend operations.
//!
//! A circuit breaker stops calling a failing dependency for a cooldown period
//! so that failures do not cascade to every caller.
//!
//! ## States
//! - **Closed**: Normal operation. Each failure extends the consecutive-failure
//!   streak, each success resets it. Reaching `failure_threshold` within the
//!   rolling window opens the circuit.
//! - **Open**: Calls are rejected immediately without invoking the operation.
//!   Once `reset_timeout` has elapsed the next call becomes a half-open trial.
//! - **Half-Open**: A limited number of trial calls run. Reaching
//!   `half_open_success_threshold` successes closes the circuit; any failure
//!   re-opens it.
//!
//! ## Usage
//!
//! ```rust
//! use bulwark_circuitbreaker::{CircuitBreaker, CircuitBreakerError};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::builder()
//!     .name("orders.db")
//!     .failure_threshold(5)
//!     .reset_timeout(Duration::from_secs(30))
//!     .build();
//!
//! match breaker.call(|| async { Ok::<_, std::io::Error>("row") }).await {
//!     Ok(row) => println!("got {}", row),
//!     Err(CircuitBreakerError::OpenCircuit { name }) => eprintln!("{} is open", name),
//!     Err(CircuitBreakerError::Inner(e)) => eprintln!("query failed: {}", e),
//! }
//! # }
//! ```
//!
//! One breaker guards one operation. Use a [`CircuitBreakerRegistry`] to hand
//! out independent breakers per operation name, so that a failing cache never
//! trips the breaker of a healthy database.
//!
//! ## Feature Flags
//! - `metrics`: emit state and call outcome metrics through the `metrics` crate
//! - `tracing`: log transitions and rejections through the `tracing` crate
//! - `serde`: derive `Serialize` for [`CircuitState`] and [`CircuitMetrics`]

use crate::circuit::{Admission, Circuit, Transition};
use bulwark_core::{EventListeners, FnListener};
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, gauge};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::sync::Once;
use std::time::Instant;

pub use circuit::{CircuitMetrics, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::{CircuitBreakerError, ConfigError};
pub use events::{CallOutcome, CircuitBreakerEvent};
pub use layer::{CircuitBreakerLayer, CircuitBreakerService};
pub use registry::CircuitBreakerRegistry;

mod circuit;
mod config;
mod error;
mod events;
mod layer;
mod registry;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

#[cfg(feature = "metrics")]
fn describe_metrics() {
    METRICS_INIT.call_once(|| {
        describe_counter!(
            "circuitbreaker_calls_total",
            "Total number of calls through the circuit breaker by outcome"
        );
        describe_counter!(
            "circuitbreaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );
        describe_gauge!(
            "circuitbreaker_state",
            "Current circuit breaker state (0 closed, 1 open, 2 half-open)"
        );
    });
}

struct Shared {
    circuit: Mutex<Circuit>,
    state_atomic: AtomicU8,
    config: CircuitBreakerConfig,
    subscribers: RwLock<EventListeners<CircuitBreakerEvent>>,
}

impl Shared {
    /// Builds the event only when a builder listener or a runtime
    /// subscriber is registered.
    fn emit_with(&self, make: impl FnOnce() -> CircuitBreakerEvent) {
        let subscribers = self.subscribers.read();
        if self.config.event_listeners.is_empty() && subscribers.is_empty() {
            return;
        }
        let event = make();
        self.config.event_listeners.emit(&event);
        subscribers.emit(&event);
    }

    fn publish_transition(&self, transition: Transition, forced: bool) {
        self.state_atomic
            .store(transition.to as u8, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::info!(
            breaker = %self.config.name,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            forced,
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(
                "circuitbreaker_transitions_total",
                "circuitbreaker" => self.config.name.clone(),
                "from" => transition.from.as_str(),
                "to" => transition.to.as_str()
            )
            .increment(1);
            gauge!("circuitbreaker_state", "circuitbreaker" => self.config.name.clone())
                .set(transition.to as u8 as f64);
        }

        self.emit_with(|| CircuitBreakerEvent::Transitioned {
            component: self.config.name.clone(),
            timestamp: Instant::now(),
            from: transition.from,
            to: transition.to,
            forced,
        });
    }

    fn finish(&self, generation: u64, state: CircuitState, failed: bool) {
        let now = Instant::now();
        let transition = {
            let mut circuit = self.circuit.lock();
            if failed {
                circuit.record_failure(&self.config, generation, now)
            } else {
                circuit.record_success(&self.config, generation, now)
            }
        };

        #[cfg(feature = "metrics")]
        counter!(
            "circuitbreaker_calls_total",
            "circuitbreaker" => self.config.name.clone(),
            "outcome" => if failed { "failure" } else { "success" }
        )
        .increment(1);

        self.emit_with(|| CircuitBreakerEvent::Recorded {
            component: self.config.name.clone(),
            timestamp: now,
            state,
            outcome: if failed {
                CallOutcome::Failure
            } else {
                CallOutcome::Success
            },
        });

        if let Some(transition) = transition {
            self.publish_transition(transition, false);
        }
    }
}

/// A circuit breaker guarding one named operation.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Creates a breaker from a configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        #[cfg(feature = "metrics")]
        describe_metrics();

        Self {
            shared: Arc::new(Shared {
                circuit: Mutex::new(Circuit::new()),
                state_atomic: AtomicU8::new(CircuitState::Closed as u8),
                config,
                subscribers: RwLock::new(EventListeners::new()),
            }),
        }
    }

    /// Returns a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Name of the guarded operation.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The configuration this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.shared.config
    }

    /// Asks for permission to perform one call.
    ///
    /// The returned [`CallPermit`] must be resolved with
    /// [`CallPermit::success`] or [`CallPermit::failure`]. Dropping it
    /// unresolved releases a half-open trial slot without recording anything.
    pub fn permit<E>(&self) -> Result<CallPermit, CircuitBreakerError<E>> {
        let admission = {
            let mut circuit = self.shared.circuit.lock();
            circuit.try_acquire(&self.shared.config, Instant::now())
        };

        match admission {
            Admission::Permitted {
                state,
                generation,
                transition,
            } => {
                if let Some(transition) = transition {
                    self.shared.publish_transition(transition, false);
                }

                #[cfg(feature = "tracing")]
                tracing::trace!(breaker = %self.shared.config.name, state = state.as_str(), "call permitted");

                self.shared.emit_with(|| CircuitBreakerEvent::Admitted {
                    component: self.shared.config.name.clone(),
                    timestamp: Instant::now(),
                    state,
                });

                Ok(CallPermit {
                    shared: Arc::clone(&self.shared),
                    generation,
                    state,
                    resolved: false,
                })
            }
            Admission::Rejected { state } => {
                #[cfg(feature = "tracing")]
                tracing::debug!(breaker = %self.shared.config.name, state = state.as_str(), "call short-circuited");

                #[cfg(feature = "metrics")]
                counter!(
                    "circuitbreaker_calls_total",
                    "circuitbreaker" => self.shared.config.name.clone(),
                    "outcome" => "rejected"
                )
                .increment(1);

                self.shared.emit_with(|| CircuitBreakerEvent::ShortCircuited {
                    component: self.shared.config.name.clone(),
                    timestamp: Instant::now(),
                    state,
                });

                Err(CircuitBreakerError::OpenCircuit {
                    name: self.shared.config.name.clone(),
                })
            }
        }
    }

    /// Runs `operation` through the breaker, counting any `Err` as a failure.
    ///
    /// When the circuit rejects the call, `operation` is never invoked.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(operation, |result| result.is_err())
            .await
    }

    /// Runs `operation` through the breaker with a custom failure classifier.
    ///
    /// Use this when some errors (a missing row, a validation error) say
    /// nothing about the health of the dependency.
    pub async fn call_classified<F, Fut, T, E, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&Result<T, E>) -> bool,
    {
        let permit = self.permit()?;
        let result = operation().await;
        if is_failure(&result) {
            permit.failure();
        } else {
            permit.success();
        }
        result.map_err(CircuitBreakerError::Inner)
    }

    /// Returns the current state without locking.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.shared.state_atomic.load(Ordering::Acquire))
    }

    /// Returns whether the circuit is currently open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Returns a snapshot of the breaker counters.
    pub fn metrics(&self) -> CircuitMetrics {
        self.shared
            .circuit
            .lock()
            .metrics(&self.shared.config, Instant::now())
    }

    /// Subscribes to every event emitted from now on.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.shared.subscribers.write().add(FnListener::new(f));
    }

    /// Subscribes to state transitions from now on.
    pub fn on_transition<F>(&self, f: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let CircuitBreakerEvent::Transitioned { from, to, .. } = event {
                f(*from, *to);
            }
        });
    }

    /// Forces the circuit into the open state.
    pub fn force_open(&self) {
        self.force(CircuitState::Open);
    }

    /// Forces the circuit into the closed state and clears the counters.
    pub fn reset(&self) {
        self.force(CircuitState::Closed);
    }

    fn force(&self, state: CircuitState) {
        let transition = self.shared.circuit.lock().force(state, Instant::now());
        if let Some(transition) = transition {
            self.shared.publish_transition(transition, true);
        }
    }

    /// Returns an HTTP status code for health endpoints: 503 when open.
    pub fn http_status(&self) -> u16 {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => 200,
            CircuitState::Open => 503,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Permission to perform one call through a [`CircuitBreaker`].
pub struct CallPermit {
    shared: Arc<Shared>,
    generation: u64,
    state: CircuitState,
    resolved: bool,
}

impl CallPermit {
    /// The state the call was admitted under.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Records a successful call.
    pub fn success(mut self) {
        self.resolved = true;
        self.shared.finish(self.generation, self.state, false);
    }

    /// Records a failed call.
    pub fn failure(mut self) {
        self.resolved = true;
        self.shared.finish(self.generation, self.state, true);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.shared.circuit.lock().abandon(self.generation);
        }
    }
}

impl std::fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.shared.config.name)
            .field("state", &self.state)
            .finish()
    }
}
