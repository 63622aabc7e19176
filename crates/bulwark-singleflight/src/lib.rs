//! Single-flight deduplication.
//!
//! Concurrent callers asking for the same key share one computation: the
//! first caller starts it, later callers wait for its result, and everyone
//! receives a clone of the same value or the same error. This keeps a burst
//! of cache misses for one hot key from turning into a burst of backend
//! queries.
//!
//! # How It Works
//!
//! 1. The first caller for a key installs an in-flight entry and spawns the
//!    computation on the runtime
//! 2. Callers that find the entry wait on it instead of computing
//! 3. Once the computation resolves, the entry stays joinable for a short
//!    grace window whatever the outcome, then is removed
//! 4. The first caller after the window starts a fresh computation, so a
//!    failure is retried at most once per window
//!
//! Because the computation runs on its own task, a caller that gives up
//! (drops its future, hits a timeout) never cancels it for the others.
//! A computation that never resolves keeps its entry forever; put a timeout
//! inside the compute function when that matters.
//!
//! # Example
//!
//! ```rust
//! use bulwark_singleflight::SingleFlight;
//!
//! # async fn example() {
//! let group: SingleFlight<String, String, String> = SingleFlight::new();
//! let profile = group
//!     .execute("user:42".to_string(), || async {
//!         Ok::<_, String>("loaded".to_string())
//!     })
//!     .await;
//! assert_eq!(profile.unwrap(), "loaded");
//! # }
//! ```
//!
//! # Prior Art
//!
//! Also known as request coalescing or request collapsing; the name comes
//! from Go's `golang.org/x/sync/singleflight`.

mod config;
mod error;

pub use config::{SingleFlightConfig, SingleFlightConfigBuilder};
pub use error::SingleFlightError;

use hashbrown::HashMap;
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};
use parking_lot::Mutex;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[cfg(feature = "tracing")]
use tracing::debug;

type Slot<V, E> = Option<Result<V, E>>;

struct Flight<V, E> {
    id: u64,
    rx: watch::Receiver<Slot<V, E>>,
}

struct Inner<K, V, E> {
    flights: Mutex<HashMap<K, Flight<V, E>>>,
    config: SingleFlightConfig,
    next_id: AtomicU64,
    executions: AtomicU64,
    joins: AtomicU64,
}

impl<K: Hash + Eq, V, E> Inner<K, V, E> {
    fn remove(&self, key: &K, id: u64) {
        let mut flights = self.flights.lock();
        if flights.get(key).is_some_and(|flight| flight.id == id) {
            flights.remove(key);
        }
    }
}

/// Removes the in-flight entry if the computation task unwinds or is
/// aborted before finishing normally.
struct FlightGuard<K: Hash + Eq, V, E> {
    inner: Arc<Inner<K, V, E>>,
    key: Option<K>,
    id: u64,
}

impl<K: Hash + Eq, V, E> FlightGuard<K, V, E> {
    fn finish(mut self) {
        if let Some(key) = self.key.take() {
            self.inner.remove(&key, self.id);
        }
    }
}

impl<K: Hash + Eq, V, E> Drop for FlightGuard<K, V, E> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.remove(&key, self.id);
        }
    }
}

/// Counters describing a single-flight group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleFlightStats {
    /// Computations started.
    pub executions: u64,
    /// Callers that joined an existing computation instead of starting one.
    pub joins: u64,
    /// Keys with an installed entry right now.
    pub in_flight: usize,
}

/// A group of keyed computations with at most one in flight per key.
///
/// Cloning is cheap; clones share the in-flight table.
pub struct SingleFlight<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for SingleFlight<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> SingleFlight<K, V, E> {
    /// Creates a group with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SingleFlightConfig::default())
    }

    /// Creates a group from a configuration.
    pub fn with_config(config: SingleFlightConfig) -> Self {
        #[cfg(feature = "metrics")]
        describe_counter!(
            "singleflight_requests_total",
            "Total number of single-flight requests by role"
        );

        Self {
            inner: Arc::new(Inner {
                flights: Mutex::new(HashMap::new()),
                config,
                next_id: AtomicU64::new(0),
                executions: AtomicU64::new(0),
                joins: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the group counters.
    pub fn stats(&self) -> SingleFlightStats {
        SingleFlightStats {
            executions: self.inner.executions.load(Ordering::Relaxed),
            joins: self.inner.joins.load(Ordering::Relaxed),
            in_flight: self.inner.flights.lock().len(),
        }
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Runs `compute` for `key` unless a computation for `key` is already in
    /// flight, in which case its result is awaited instead.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn execute<F, Fut>(&self, key: K, compute: F) -> Result<V, SingleFlightError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (rx, lead) = {
            let mut flights = self.inner.flights.lock();
            match flights.get(&key) {
                Some(flight) => (flight.rx.clone(), None),
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    flights.insert(
                        key.clone(),
                        Flight {
                            id,
                            rx: rx.clone(),
                        },
                    );
                    (rx, Some((tx, id)))
                }
            }
        };

        match lead {
            Some((tx, id)) => {
                self.inner.executions.fetch_add(1, Ordering::Relaxed);

                #[cfg(feature = "metrics")]
                counter!("singleflight_requests_total", "singleflight" => self.inner.config.name.clone(), "role" => "leader").increment(1);

                #[cfg(feature = "tracing")]
                debug!(singleflight = %self.inner.config.name, "starting computation");

                self.spawn_leader(key, id, tx, compute);
            }
            None => {
                self.inner.joins.fetch_add(1, Ordering::Relaxed);

                #[cfg(feature = "metrics")]
                counter!("singleflight_requests_total", "singleflight" => self.inner.config.name.clone(), "role" => "joiner").increment(1);

                #[cfg(feature = "tracing")]
                debug!(singleflight = %self.inner.config.name, "joining in-flight computation");
            }
        }

        wait(rx).await
    }

    fn spawn_leader<F, Fut>(&self, key: K, id: u64, tx: watch::Sender<Slot<V, E>>, compute: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            key: Some(key),
            id,
        };
        let grace = self.inner.config.grace;

        tokio::spawn(async move {
            tx.send_replace(Some(compute().await));

            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
            guard.finish();
        });
    }

    /// Drops the entry for `key` so the next caller starts a fresh
    /// computation. Callers already waiting still receive the old result.
    pub fn forget(&self, key: &K) -> bool {
        self.inner.flights.lock().remove(key).is_some()
    }
}

async fn wait<V: Clone, E: Clone>(
    mut rx: watch::Receiver<Slot<V, E>>,
) -> Result<V, SingleFlightError<E>> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(result) = current {
            return result.map_err(SingleFlightError::Compute);
        }
        if rx.changed().await.is_err() {
            let last = rx.borrow().clone();
            return match last {
                Some(result) => result.map_err(SingleFlightError::Compute),
                None => Err(SingleFlightError::Abandoned),
            };
        }
    }
}
