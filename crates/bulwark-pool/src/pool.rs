use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::error::PoolError;
use crate::events::{CloseReason, PoolEvent};
use crate::ConnectionManager;
use bulwark_circuitbreaker::{CircuitBreaker, CircuitBreakerError};
use bulwark_healthcheck::{ComponentHealth, HealthStatus};
#[cfg(feature = "metrics")]
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lifecycle state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Open and waiting in the pool.
    Idle,
    /// Checked out by a caller.
    Active,
    /// Being validated before reuse.
    Validating,
    /// Closed and gone from the pool.
    Closed,
}

impl EntryState {
    /// Returns a static label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Idle => "idle",
            EntryState::Active => "active",
            EntryState::Validating => "validating",
            EntryState::Closed => "closed",
        }
    }
}

/// Snapshot of pool occupancy and lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections waiting in the pool.
    pub idle: usize,
    /// Connections checked out.
    pub active: usize,
    /// Connections being validated.
    pub validating: usize,
    /// Connections being opened.
    pub connecting: usize,
    /// Configured upper bound.
    pub max_size: usize,
    /// Connections opened since the pool was created.
    pub created: u64,
    /// Connections closed since the pool was created.
    pub closed: u64,
    /// Acquires that gave up waiting.
    pub timeouts: u64,
}

impl PoolStats {
    /// Open connections, including ones being opened or validated.
    pub fn total(&self) -> usize {
        self.idle + self.active + self.validating + self.connecting
    }

    /// Count of connections in `state`. `Closed` is the lifetime count.
    pub fn count(&self, state: EntryState) -> u64 {
        match state {
            EntryState::Idle => self.idle as u64,
            EntryState::Active => self.active as u64,
            EntryState::Validating => self.validating as u64,
            EntryState::Closed => self.closed,
        }
    }
}

pub(crate) struct Slot<C> {
    pub(crate) conn: C,
    last_validated_at: Instant,
    idle_since: Instant,
}

impl<C> Slot<C> {
    fn new(conn: C) -> Self {
        let now = Instant::now();
        Self {
            conn,
            last_validated_at: now,
            idle_since: now,
        }
    }

    pub(crate) fn validated_now(&mut self) {
        self.last_validated_at = Instant::now();
    }
}

pub(crate) struct Bookkeeping<C> {
    idle: VecDeque<Slot<C>>,
    active: usize,
    validating: usize,
    connecting: usize,
    closed: bool,
}

impl<C> Bookkeeping<C> {
    fn total(&self) -> usize {
        self.idle.len() + self.active + self.validating + self.connecting
    }

    pub(crate) fn release_active(&mut self) {
        self.active -= 1;
    }

    /// Returns a checked-out connection to the idle list, or hands it back
    /// if the pool has been closed.
    pub(crate) fn check_in(&mut self, mut slot: Slot<C>) -> Option<C> {
        self.active -= 1;
        if self.closed {
            return Some(slot.conn);
        }
        slot.idle_since = Instant::now();
        self.idle.push_back(slot);
        None
    }
}

#[derive(Clone, Copy)]
enum InFlightKind {
    Connecting,
    Validating,
}

/// Undoes a `connecting`/`validating` reservation if the acquiring future
/// is dropped before it settles.
struct InFlight<'a, M: ConnectionManager> {
    shared: &'a Shared<M>,
    kind: InFlightKind,
    settled: bool,
}

impl<'a, M: ConnectionManager> InFlight<'a, M> {
    fn new(shared: &'a Shared<M>, kind: InFlightKind) -> Self {
        Self {
            shared,
            kind,
            settled: false,
        }
    }

    fn settle(mut self, state: &mut Bookkeeping<M::Connection>) {
        self.settled = true;
        match self.kind {
            InFlightKind::Connecting => state.connecting -= 1,
            InFlightKind::Validating => state.validating -= 1,
        }
    }
}

impl<M: ConnectionManager> Drop for InFlight<'_, M> {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.shared.state.lock();
            match self.kind {
                InFlightKind::Connecting => state.connecting -= 1,
                InFlightKind::Validating => state.validating -= 1,
            }
        }
    }
}

enum Reserved<C> {
    Ready(Slot<C>),
    Validate(Slot<C>),
    Connect,
}

pub(crate) struct Shared<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    pub(crate) state: Mutex<Bookkeeping<M::Connection>>,
    created: AtomicU64,
    closed: AtomicU64,
    timeouts: AtomicU64,
}

impl<M: ConnectionManager> Shared<M> {
    fn breaker(&self) -> &CircuitBreaker {
        &self.config.breaker
    }

    async fn connect(&self) -> Result<M::Connection, PoolError> {
        let timeout = self.config.connect_timeout;
        self.breaker()
            .call(|| async move {
                match tokio::time::timeout(timeout, self.manager.connect()).await {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(format!("connect timed out after {:?}", timeout)),
                }
            })
            .await
            .map_err(|err| match err {
                CircuitBreakerError::OpenCircuit { name } => PoolError::CircuitOpen(name),
                CircuitBreakerError::Inner(reason) => PoolError::Connect {
                    pool: self.config.name.clone(),
                    reason,
                },
            })
    }

    pub(crate) async fn validate(&self, conn: &mut M::Connection) -> Result<(), PoolError> {
        let timeout = self.config.connect_timeout;
        self.breaker()
            .call(|| async move {
                match tokio::time::timeout(timeout, self.manager.validate(conn)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(format!("validation timed out after {:?}", timeout)),
                }
            })
            .await
            .map_err(|err| match err {
                CircuitBreakerError::OpenCircuit { name } => PoolError::CircuitOpen(name),
                CircuitBreakerError::Inner(reason) => PoolError::Validation(reason),
            })
    }

    pub(crate) async fn close(&self, conn: M::Connection, reason: CloseReason) {
        let _ = tokio::time::timeout(self.config.connect_timeout, self.manager.close(conn)).await;
        self.note_closed(reason);
    }

    pub(crate) fn note_closed(&self, reason: CloseReason) {
        self.closed.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::debug!(pool = %self.config.name, reason = reason.as_str(), "connection closed");

        #[cfg(feature = "metrics")]
        counter!("pool_connections_closed_total", "pool" => self.config.name.clone(), "reason" => reason.as_str())
            .increment(1);

        self.config.event_listeners.emit(&PoolEvent::ConnectionClosed {
            component: self.config.name.clone(),
            timestamp: std::time::Instant::now(),
            reason,
        });
        self.publish_gauges();
    }

    fn opened(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        let total = self.state.lock().total();

        #[cfg(feature = "tracing")]
        tracing::debug!(pool = %self.config.name, total, "connection opened");

        self.config.event_listeners.emit(&PoolEvent::ConnectionCreated {
            component: self.config.name.clone(),
            timestamp: std::time::Instant::now(),
            total,
        });
        self.publish_gauges();
    }

    /// Opens a connection for a caller that already holds a permit and has
    /// reserved a `connecting` slot.
    async fn connect_reserved(&self, guard: InFlight<'_, M>) -> Result<Slot<M::Connection>, PoolError> {
        let conn = self.connect().await?;
        {
            let mut state = self.state.lock();
            guard.settle(&mut state);
            state.active += 1;
        }
        self.opened();
        Ok(Slot::new(conn))
    }

    async fn checkout(&self) -> Result<Slot<M::Connection>, PoolError> {
        let now = Instant::now();
        let reserved = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::Closed(self.config.name.clone()));
            }
            match state.idle.pop_back() {
                Some(slot)
                    if now.saturating_duration_since(slot.last_validated_at)
                        >= self.config.validation_interval =>
                {
                    state.validating += 1;
                    Reserved::Validate(slot)
                }
                Some(slot) => {
                    state.active += 1;
                    Reserved::Ready(slot)
                }
                None => {
                    state.connecting += 1;
                    Reserved::Connect
                }
            }
        };

        match reserved {
            Reserved::Ready(slot) => Ok(slot),
            Reserved::Connect => {
                self.connect_reserved(InFlight::new(self, InFlightKind::Connecting))
                    .await
            }
            Reserved::Validate(mut slot) => {
                let guard = InFlight::new(self, InFlightKind::Validating);
                match self.validate(&mut slot.conn).await {
                    Ok(()) => {
                        slot.validated_now();
                        let mut state = self.state.lock();
                        guard.settle(&mut state);
                        state.active += 1;
                        Ok(slot)
                    }
                    Err(PoolError::CircuitOpen(name)) => {
                        let mut state = self.state.lock();
                        guard.settle(&mut state);
                        state.idle.push_back(slot);
                        Err(PoolError::CircuitOpen(name))
                    }
                    Err(err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(pool = %self.config.name, error = %err, "connection failed validation, replacing");

                        #[cfg(not(feature = "tracing"))]
                        let _ = err;

                        {
                            let mut state = self.state.lock();
                            guard.settle(&mut state);
                            state.connecting += 1;
                        }
                        let replacement = InFlight::new(self, InFlightKind::Connecting);
                        self.close(slot.conn, CloseReason::ValidationFailed).await;
                        self.connect_reserved(replacement).await
                    }
                }
            }
        }
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.active,
            validating: state.validating,
            connecting: state.connecting,
            max_size: self.config.max_size,
            created: self.created.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn publish_gauges(&self) {
        #[cfg(feature = "metrics")]
        {
            let stats = self.stats();
            for (state, count) in [
                (EntryState::Idle, stats.idle),
                (EntryState::Active, stats.active),
                (EntryState::Validating, stats.validating),
            ] {
                gauge!("pool_connections", "pool" => self.config.name.clone(), "state" => state.as_str())
                    .set(count as f64);
            }
        }
    }
}

/// A bounded pool of connections to one backing resource.
///
/// At most `max_size` connections are open at once. Callers beyond that
/// wait up to `acquire_timeout` for a release, then fail with
/// [`PoolError::Exhausted`]. Every connect and validation goes through the
/// pool's circuit breaker, so a dead resource is stopped being dialed
/// quickly. The pool lock covers bookkeeping only and is never held across
/// I/O.
///
/// Cloning is cheap; clones share the same connections.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use bulwark_pool::{ConnectionManager, PoolConfig};
/// use std::time::Duration;
///
/// struct Counter;
///
/// #[async_trait]
/// impl ConnectionManager for Counter {
///     type Connection = u32;
///     type Error = std::io::Error;
///
///     async fn connect(&self) -> Result<u32, std::io::Error> {
///         Ok(7)
///     }
///
///     async fn validate(&self, _conn: &mut u32) -> Result<(), std::io::Error> {
///         Ok(())
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PoolConfig::builder()
///     .name("counter")
///     .max_size(4)
///     .acquire_timeout(Duration::from_millis(200))
///     .build(Counter)?;
///
/// let conn = pool.acquire().await?;
/// assert_eq!(*conn, 7);
/// pool.release(conn);
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<M: ConnectionManager> {
    shared: Arc<Shared<M>>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Creates an empty pool. Call [`Self::warm_up`] to open `min_size`
    /// connections up front.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        #[cfg(feature = "metrics")]
        crate::describe_metrics();

        Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(config.max_size)),
                manager,
                config,
                state: Mutex::new(Bookkeeping {
                    idle: VecDeque::new(),
                    active: 0,
                    validating: 0,
                    connecting: 0,
                    closed: false,
                }),
                created: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
            }),
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// The breaker guarding connects and validations.
    pub fn breaker(&self) -> &CircuitBreaker {
        self.shared.breaker()
    }

    /// The connection manager.
    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    /// Checks out a connection.
    ///
    /// Returns an idle connection when one exists, validating it first if it
    /// has not been validated within `validation_interval`. A connection
    /// that fails validation is closed and replaced once. Below `max_size`
    /// a new connection is opened; at `max_size` the caller waits up to
    /// `acquire_timeout`. Dropping the returned future abandons the wait.
    pub async fn acquire(&self) -> Result<PooledConnection<M>, PoolError> {
        let started = Instant::now();
        let config = &self.shared.config;

        let permit = match tokio::time::timeout(
            config.acquire_timeout,
            Arc::clone(&self.shared.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed(config.name.clone())),
            Err(_) => {
                let waited = started.elapsed();
                self.shared.timeouts.fetch_add(1, Ordering::Relaxed);

                #[cfg(feature = "tracing")]
                tracing::warn!(pool = %config.name, max_size = config.max_size, ?waited, "pool exhausted");

                #[cfg(feature = "metrics")]
                counter!("pool_acquire_timeouts_total", "pool" => config.name.clone()).increment(1);

                config.event_listeners.emit(&PoolEvent::AcquireTimedOut {
                    component: config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    waited,
                });
                return Err(PoolError::Exhausted {
                    pool: config.name.clone(),
                    max_size: config.max_size,
                    waited,
                });
            }
        };

        let slot = self.shared.checkout().await?;

        #[cfg(feature = "metrics")]
        histogram!("pool_acquire_wait_seconds", "pool" => config.name.clone())
            .record(started.elapsed().as_secs_f64());

        self.shared.publish_gauges();
        Ok(PooledConnection::new(Arc::clone(&self.shared), slot, permit))
    }

    /// Returns a connection to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<M>) {
        drop(conn);
    }

    /// Opens connections until `min_size` are open, returning how many were
    /// opened. Stops early when every slot is checked out.
    pub async fn warm_up(&self) -> Result<usize, PoolError> {
        let shared = &*self.shared;
        let mut opened = 0;
        loop {
            let Ok(permit) = Arc::clone(&shared.semaphore).try_acquire_owned() else {
                break;
            };
            {
                let mut state = shared.state.lock();
                if state.closed {
                    return Err(PoolError::Closed(shared.config.name.clone()));
                }
                if state.total() >= shared.config.min_size {
                    break;
                }
                state.connecting += 1;
            }
            let guard = InFlight::new(shared, InFlightKind::Connecting);
            let conn = shared.connect().await?;
            {
                let mut state = shared.state.lock();
                guard.settle(&mut state);
                state.idle.push_back(Slot::new(conn));
            }
            shared.opened();
            drop(permit);
            opened += 1;
        }

        #[cfg(feature = "tracing")]
        {
            if opened > 0 {
                tracing::info!(pool = %shared.config.name, opened, "pool warmed up");
            }
        }

        Ok(opened)
    }

    /// Closes connections idle longer than `idle_timeout`, oldest first,
    /// never dropping below `min_size` open connections. Returns how many
    /// were closed.
    pub async fn sweep_idle(&self) -> usize {
        let shared = &*self.shared;
        let now = Instant::now();
        let expired: Vec<M::Connection> = {
            let mut state = shared.state.lock();
            let mut removable = state.total().saturating_sub(shared.config.min_size);
            let mut kept = VecDeque::with_capacity(state.idle.len());
            let mut expired = Vec::new();
            while let Some(slot) = state.idle.pop_front() {
                let idle_for = now.saturating_duration_since(slot.idle_since);
                if removable > 0 && idle_for >= shared.config.idle_timeout {
                    removable -= 1;
                    expired.push(slot.conn);
                } else {
                    kept.push_back(slot);
                }
            }
            state.idle = kept;
            expired
        };

        let count = expired.len();
        for conn in expired {
            shared.close(conn, CloseReason::IdleTimeout).await;
        }
        count
    }

    /// Spawns a task that sweeps idle connections and tops the pool back up
    /// to `min_size` every `interval`. The task exits once every handle to
    /// the pool is dropped or the pool is closed.
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Shared<M>> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let pool = ConnectionPool { shared };
                if pool.is_closed() {
                    break;
                }
                pool.sweep_idle().await;
                if let Err(err) = pool.warm_up().await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(pool = %pool.name(), error = %err, "maintenance could not restore min_size");

                    #[cfg(not(feature = "tracing"))]
                    let _ = err;
                }
            }
        })
    }

    /// Closes the pool: pending and future acquires fail, idle connections
    /// are closed now and checked-out ones when they are released.
    pub async fn close(&self) -> usize {
        let shared = &*self.shared;
        let idle: Vec<M::Connection> = {
            let mut state = shared.state.lock();
            state.closed = true;
            state.idle.drain(..).map(|slot| slot.conn).collect()
        };
        shared.semaphore.close();

        let count = idle.len();
        for conn in idle {
            shared.close(conn, CloseReason::PoolClosed).await;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(pool = %shared.config.name, closed = count, "pool closed");

        count
    }

    /// Returns true once [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Occupancy and lifetime counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Checks the backing resource with a validation round trip on a pooled
    /// connection.
    ///
    /// Open circuit or failing validation: unhealthy. No connection free
    /// within the acquire timeout: degraded.
    pub async fn health_check(&self) -> ComponentHealth {
        let started = Instant::now();
        let name = self.name().to_string();

        let report = if self.breaker().is_open() {
            ComponentHealth::unhealthy(name, "circuit open")
        } else {
            match self.acquire().await {
                Ok(mut conn) => match self.shared.validate(&mut *conn).await {
                    Ok(()) => {
                        conn.mark_validated();
                        ComponentHealth::healthy(name)
                    }
                    Err(err) => {
                        conn.discard().await;
                        ComponentHealth::unhealthy(name, err.to_string())
                    }
                },
                Err(err @ PoolError::Exhausted { .. }) => {
                    ComponentHealth::new(name, HealthStatus::Degraded)
                        .with_detail("reason", err.to_string())
                }
                Err(err) => ComponentHealth::unhealthy(name, err.to_string()),
            }
        };

        let stats = self.stats();
        report
            .with_detail("active", stats.active)
            .with_detail("idle", stats.idle)
            .with_detail("max_size", stats.max_size)
            .with_detail("breaker", self.breaker().state().as_str())
            .with_latency(started.elapsed())
    }
}

impl<M: ConnectionManager> std::fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.shared.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}
