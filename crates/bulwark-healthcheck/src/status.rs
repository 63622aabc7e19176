use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Health of one component, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HealthStatus {
    /// Working normally.
    Healthy,
    /// Working with reduced guarantees (memory-only cache, local-only rate
    /// limiting, a saturated pool).
    Degraded,
    /// Not usable.
    Unhealthy,
}

impl HealthStatus {
    /// Returns true for `Healthy` and `Degraded`.
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }

    /// Returns a static label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking one component.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ComponentHealth {
    /// Component name.
    pub component: String,
    /// Reported status.
    pub status: HealthStatus,
    /// How long the check took.
    pub latency: Duration,
    /// Free-form key/value details (counters, states, error messages).
    pub details: BTreeMap<String, String>,
    /// When the check finished.
    pub checked_at: SystemTime,
}

impl ComponentHealth {
    /// A report with the given status and no details.
    pub fn new(component: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            component: component.into(),
            status,
            latency: Duration::ZERO,
            details: BTreeMap::new(),
            checked_at: SystemTime::now(),
        }
    }

    /// A healthy report.
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy)
    }

    /// A degraded report with a reason.
    pub fn degraded(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Degraded).with_detail("reason", reason.into())
    }

    /// An unhealthy report with a reason.
    pub fn unhealthy(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Unhealthy).with_detail("reason", reason.into())
    }

    /// Adds a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    /// Sets the measured latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Aggregated health of every registered component.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SystemHealth {
    /// Worst status across `checks`; `Healthy` when nothing is registered.
    pub status: HealthStatus,
    /// Per-component reports keyed by component name.
    pub checks: BTreeMap<String, ComponentHealth>,
    /// When aggregation finished.
    pub checked_at: SystemTime,
}

impl SystemHealth {
    /// Builds a report whose status is the worst of `checks`.
    pub fn from_checks(checks: impl IntoIterator<Item = ComponentHealth>) -> Self {
        let checks: BTreeMap<String, ComponentHealth> = checks
            .into_iter()
            .map(|check| (check.component.clone(), check))
            .collect();
        let status = checks
            .values()
            .map(|check| check.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            checks,
            checked_at: SystemTime::now(),
        }
    }

    /// HTTP status for a health endpoint: 200 while usable, 503 otherwise.
    pub fn http_status(&self) -> u16 {
        if self.status.is_usable() {
            200
        } else {
            503
        }
    }

    /// Names of components reporting anything other than `Healthy`.
    pub fn failing(&self) -> Vec<&str> {
        self.checks
            .values()
            .filter(|check| check.status != HealthStatus::Healthy)
            .map(|check| check.component.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_status_is_the_worst() {
        let health = SystemHealth::from_checks([
            ComponentHealth::healthy("cache"),
            ComponentHealth::degraded("ratelimiter", "store unreachable"),
            ComponentHealth::healthy("pool"),
        ]);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.http_status(), 200);
        assert_eq!(health.failing(), vec!["ratelimiter"]);

        let health = SystemHealth::from_checks([
            ComponentHealth::degraded("cache", "memory only"),
            ComponentHealth::unhealthy("pool", "connection refused"),
        ]);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.http_status(), 503);
    }

    #[test]
    fn empty_report_is_healthy() {
        let health = SystemHealth::from_checks(Vec::new());
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.checks.is_empty());
    }

    #[test]
    fn details_keep_reason() {
        let report = ComponentHealth::unhealthy("db", "timeout").with_detail("attempts", 3);
        assert_eq!(report.details.get("reason").map(String::as_str), Some("timeout"));
        assert_eq!(report.details.get("attempts").map(String::as_str), Some("3"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_status_in_snake_case() {
        let json = serde_json::to_string(&HealthStatus::Unhealthy).unwrap();
        assert_eq!(json, "\"unhealthy\"");
    }
}
