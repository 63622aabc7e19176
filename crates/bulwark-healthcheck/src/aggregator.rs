use crate::events::HealthEvent;
use crate::{ComponentHealth, HealthCheck, HealthStatus, SystemHealth};
use bulwark_core::{EventListeners, FnListener};
#[cfg(feature = "metrics")]
use metrics::gauge;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Builder for [`HealthAggregator`].
pub struct HealthAggregatorBuilder {
    name: String,
    timeout: Duration,
    checks: Vec<Arc<dyn HealthCheck>>,
    listeners: EventListeners<HealthEvent>,
}

impl HealthAggregatorBuilder {
    fn new() -> Self {
        Self {
            name: String::from("health"),
            timeout: Duration::from_secs(2),
            checks: Vec::new(),
            listeners: EventListeners::new(),
        }
    }

    /// Names the aggregator in events and logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the per-check timeout. A check that overruns is reported as
    /// unhealthy.
    ///
    /// Default: 2 seconds
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers a component check.
    pub fn check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Registers a callback for overall status changes.
    pub fn on_status_change<F>(mut self, f: F) -> Self
    where
        F: Fn(HealthStatus, HealthStatus) + Send + Sync + 'static,
    {
        self.listeners
            .add(FnListener::new(move |event: &HealthEvent| {
                if let HealthEvent::StatusChanged { from, to, .. } = event {
                    f(*from, *to);
                }
            }));
        self
    }

    /// Builds the aggregator.
    pub fn build(self) -> HealthAggregator {
        #[cfg(feature = "metrics")]
        crate::describe_metrics();

        HealthAggregator {
            name: self.name,
            timeout: self.timeout,
            checks: RwLock::new(self.checks),
            latest: RwLock::new(None),
            listeners: self.listeners,
        }
    }
}

/// Runs every registered [`HealthCheck`] and rolls the results into one
/// [`SystemHealth`].
///
/// Checks run concurrently, each on its own task under the configured
/// timeout, so one slow or panicking check cannot hold up the report.
pub struct HealthAggregator {
    name: String,
    timeout: Duration,
    checks: RwLock<Vec<Arc<dyn HealthCheck>>>,
    latest: RwLock<Option<SystemHealth>>,
    listeners: EventListeners<HealthEvent>,
}

impl HealthAggregator {
    /// Creates an aggregator with default settings and no checks.
    pub fn new() -> Self {
        HealthAggregatorBuilder::new().build()
    }

    /// Starts building an aggregator.
    pub fn builder() -> HealthAggregatorBuilder {
        HealthAggregatorBuilder::new()
    }

    /// Registers a check, replacing any existing check with the same name.
    pub fn register(&self, check: Arc<dyn HealthCheck>) {
        let mut checks = self.checks.write();
        checks.retain(|existing| existing.name() != check.name());
        checks.push(check);
    }

    /// Number of registered checks.
    pub fn len(&self) -> usize {
        self.checks.read().len()
    }

    /// Returns true if no checks are registered.
    pub fn is_empty(&self) -> bool {
        self.checks.read().is_empty()
    }

    /// The most recent report, if a check has run.
    pub fn latest(&self) -> Option<SystemHealth> {
        self.latest.read().clone()
    }

    /// Runs every check and returns the aggregated report.
    pub async fn check_health(&self) -> SystemHealth {
        let checks: Vec<Arc<dyn HealthCheck>> = self.checks.read().clone();
        let timeout = self.timeout;

        let running: Vec<(String, JoinHandle<(ComponentHealth, bool)>)> = checks
            .into_iter()
            .map(|check| {
                let name = check.name().to_string();
                let handle = tokio::spawn(async move {
                    let started = tokio::time::Instant::now();
                    match tokio::time::timeout(timeout, check.check()).await {
                        Ok(mut report) => {
                            if report.latency.is_zero() {
                                report.latency = started.elapsed();
                            }
                            (report, false)
                        }
                        Err(_) => (
                            ComponentHealth::unhealthy(
                                check.name(),
                                format!("check timed out after {:?}", timeout),
                            )
                            .with_latency(timeout),
                            true,
                        ),
                    }
                });
                (name, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(running.len());
        for (name, handle) in running {
            let mut report = match handle.await {
                Ok((report, timed_out)) => {
                    if timed_out {
                        self.listeners.emit(&HealthEvent::CheckTimedOut {
                            component: self.name.clone(),
                            timestamp: std::time::Instant::now(),
                            check: name.clone(),
                        });
                    }
                    report
                }
                Err(err) => {
                    let reason = if err.is_panic() {
                        "check panicked"
                    } else {
                        "check cancelled"
                    };
                    ComponentHealth::unhealthy(name.as_str(), reason)
                }
            };
            report.component = name;

            #[cfg(feature = "metrics")]
            gauge!("health_status", "component" => report.component.clone())
                .set(report.status as u8 as f64);

            reports.push(report);
        }

        let health = SystemHealth::from_checks(reports);
        self.publish(&health);
        health
    }

    /// Spawns a task that refreshes [`Self::latest`] every `interval`. The
    /// task exits once the aggregator is dropped.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(aggregator) = weak.upgrade() else {
                    break;
                };
                aggregator.check_health().await;
            }
        })
    }

    fn publish(&self, health: &SystemHealth) {
        let previous = self.latest.write().replace(health.clone());
        let from = previous.map(|previous| previous.status);

        if let Some(from) = from.filter(|from| *from != health.status) {
            #[cfg(feature = "tracing")]
            {
                if health.status == HealthStatus::Healthy {
                    tracing::info!(aggregator = %self.name, from = %from, "system healthy again");
                } else {
                    tracing::warn!(
                        aggregator = %self.name,
                        from = %from,
                        to = %health.status,
                        failing = ?health.failing(),
                        "system health changed"
                    );
                }
            }

            self.listeners.emit(&HealthEvent::StatusChanged {
                component: self.name.clone(),
                timestamp: std::time::Instant::now(),
                from,
                to: health.status,
            });
        }
    }
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthAggregator")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("checks", &self.len())
            .finish()
    }
}
