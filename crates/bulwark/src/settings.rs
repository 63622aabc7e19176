//! Externally supplied configuration for every component.
//!
//! [`BulwarkSettings`] deserializes from any serde format; every field has a
//! default, so a partial document only overrides what it names:
//!
//! ```json
//! {
//!   "cache": { "kind": "memory", "max_size": 5000 },
//!   "rate_limit": {
//!     "default_capacity": 100,
//!     "default_refill_per_second": 10.0,
//!     "policies": { "user": { "capacity": 5, "refill_per_second": 1.0 } }
//!   },
//!   "pool": { "max_size": 20, "acquire_timeout_ms": 500 }
//! }
//! ```
//!
//! [`BulwarkSettings::validate`] checks the whole tree; the registry calls it
//! before building anything.

use crate::error::SettingsError;
use bulwark_cache::CacheAdapterConfig;
use bulwark_circuitbreaker::CircuitBreakerConfig;
use bulwark_pool::PoolConfigBuilder;
use bulwark_ratelimiter::RateLimiterConfigBuilder;
use bulwark_singleflight::SingleFlightConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulwarkSettings {
    /// Cache adapter tree.
    pub cache: CacheAdapterConfig,
    /// Cache maintenance.
    pub cache_maintenance: CacheMaintenanceSettings,
    /// Per-key admission budgets.
    pub rate_limit: RateLimitSettings,
    /// Template for every breaker handed out by the registry.
    pub circuit_breaker: CircuitBreakerSettings,
    /// In-flight deduplication.
    pub single_flight: SingleFlightSettings,
    /// Connection pool sizing and timeouts.
    pub pool: PoolSettings,
    /// Health aggregation.
    pub health: HealthSettings,
}

impl BulwarkSettings {
    /// Parses settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|err| SettingsError::Parse(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.cache.validate()?;
        self.cache_maintenance.validate()?;
        self.rate_limit.validate()?;
        self.circuit_breaker.validate()?;
        self.single_flight.validate()?;
        self.pool.validate()?;
        self.health.validate()?;
        Ok(())
    }
}

fn non_zero(section: &'static str, field: &str, value: u64) -> Result<(), SettingsError> {
    if value == 0 {
        Err(SettingsError::invalid(section, format!("{} must be non-zero", field)))
    } else {
        Ok(())
    }
}

/// Background work on the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheMaintenanceSettings {
    /// How often writes accepted in degraded mode are re-pushed to the
    /// distributed tier. Only used when the cache has a distributed tier.
    pub reconcile_interval_ms: u64,
}

impl Default for CacheMaintenanceSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: 30_000,
        }
    }
}

impl CacheMaintenanceSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        non_zero("cache_maintenance", "reconcile_interval_ms", self.reconcile_interval_ms)
    }

    /// Reconciliation interval.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

/// One token-bucket policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Bucket size.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_second: f64,
}

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Bucket size for keys without a configured prefix.
    pub default_capacity: u32,
    /// Refill rate for keys without a configured prefix.
    pub default_refill_per_second: f64,
    /// Policies keyed by key prefix (the part before the first `:`).
    pub policies: BTreeMap<String, PolicySettings>,
    /// Timeout for shared bucket-store round trips.
    pub store_timeout_ms: u64,
    /// Number of local bucket shards.
    pub shards: usize,
    /// How often untouched buckets are swept.
    pub sweep_interval_ms: u64,
    /// Buckets untouched for this long are dropped by the sweep.
    pub idle_ttl_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default_capacity: 100,
            default_refill_per_second: 10.0,
            policies: BTreeMap::new(),
            store_timeout_ms: 50,
            shards: 16,
            sweep_interval_ms: 60_000,
            idle_ttl_ms: 600_000,
        }
    }
}

impl RateLimitSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        non_zero("rate_limit", "sweep_interval_ms", self.sweep_interval_ms)?;
        non_zero("rate_limit", "idle_ttl_ms", self.idle_ttl_ms)?;
        self.builder().validate()?;
        Ok(())
    }

    /// A limiter builder carrying these settings.
    pub fn builder(&self) -> RateLimiterConfigBuilder {
        let mut builder = RateLimiterConfigBuilder::new()
            .name("rate_limiter")
            .default_policy(self.default_capacity, self.default_refill_per_second)
            .store_timeout(Duration::from_millis(self.store_timeout_ms))
            .shards(self.shards);
        for (prefix, policy) in &self.policies {
            builder = builder.policy(prefix.clone(), policy.capacity, policy.refill_per_second);
        }
        builder
    }

    /// Sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Idle bucket lifetime.
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }
}

/// Breaker template settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open a circuit.
    pub failure_threshold: u32,
    /// Window in which the failure streak must accumulate.
    pub rolling_window_ms: u64,
    /// How long a circuit stays open before a trial call.
    pub reset_timeout_ms: u64,
    /// Trial successes that close a half-open circuit.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            rolling_window_ms: 60_000,
            reset_timeout_ms: 30_000,
            half_open_success_threshold: 2,
        }
    }
}

impl CircuitBreakerSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        self.builder().validate()?;
        Ok(())
    }

    fn builder(&self) -> bulwark_circuitbreaker::CircuitBreakerConfigBuilder {
        CircuitBreakerConfig::builder()
            .failure_threshold(self.failure_threshold)
            .rolling_window(Duration::from_millis(self.rolling_window_ms))
            .reset_timeout(Duration::from_millis(self.reset_timeout_ms))
            .half_open_success_threshold(self.half_open_success_threshold)
    }

    /// The template configuration for a `CircuitBreakerRegistry`.
    pub fn template(&self) -> CircuitBreakerConfig {
        self.builder().into_config()
    }
}

/// Single-flight settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleFlightSettings {
    /// How long a finished computation stays joinable.
    pub grace_ms: u64,
}

impl Default for SingleFlightSettings {
    fn default() -> Self {
        Self { grace_ms: 100 }
    }
}

impl SingleFlightSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        if self.grace_ms > 60_000 {
            return Err(SettingsError::invalid(
                "single_flight",
                "grace_ms must not exceed one minute",
            ));
        }
        Ok(())
    }

    /// Single-flight configuration with these settings.
    pub fn config(&self, name: &str) -> SingleFlightConfig {
        SingleFlightConfig::builder()
            .name(name)
            .grace(Duration::from_millis(self.grace_ms))
            .into_config()
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Pool name; the pool's breaker is `<name>.connect`.
    pub name: String,
    /// Connections kept open when idle.
    pub min_size: usize,
    /// Upper bound on open connections.
    pub max_size: usize,
    /// How long `acquire` waits.
    pub acquire_timeout_ms: u64,
    /// Timeout for connects and validations.
    pub connect_timeout_ms: u64,
    /// Idle connections older than this are validated before reuse.
    pub validation_interval_ms: u64,
    /// Idle connections unused for this long are closed.
    pub idle_timeout_ms: u64,
    /// How often the idle sweep and `min_size` top-up run.
    pub maintenance_interval_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            name: String::from("pool"),
            min_size: 0,
            max_size: 10,
            acquire_timeout_ms: 1_000,
            connect_timeout_ms: 5_000,
            validation_interval_ms: 30_000,
            idle_timeout_ms: 600_000,
            maintenance_interval_ms: 30_000,
        }
    }
}

impl PoolSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        if self.name.is_empty() {
            return Err(SettingsError::invalid("pool", "name must not be empty"));
        }
        non_zero("pool", "maintenance_interval_ms", self.maintenance_interval_ms)?;
        self.builder().into_config()?;
        Ok(())
    }

    /// A pool builder carrying these settings. Pass a breaker from the
    /// registry with [`PoolConfigBuilder::breaker`] to have it reported in
    /// health checks.
    pub fn builder(&self) -> PoolConfigBuilder {
        PoolConfigBuilder::new()
            .name(self.name.clone())
            .min_size(self.min_size)
            .max_size(self.max_size)
            .acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .validation_interval(Duration::from_millis(self.validation_interval_ms))
            .idle_timeout(Duration::from_millis(self.idle_timeout_ms))
    }

    /// Maintenance interval.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

/// Health aggregation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Per-check timeout.
    pub check_timeout_ms: u64,
    /// How often the background poller refreshes the report.
    pub poll_interval_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_timeout_ms: 2_000,
            poll_interval_ms: 10_000,
        }
    }
}

impl HealthSettings {
    fn validate(&self) -> Result<(), SettingsError> {
        non_zero("health", "check_timeout_ms", self.check_timeout_ms)?;
        non_zero("health", "poll_interval_ms", self.poll_interval_ms)
    }

    /// Per-check timeout.
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    /// Poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
