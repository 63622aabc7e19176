use crate::bucket::BucketPolicy;
use crate::error::ConfigError;
use crate::events::RateLimiterEvent;
use crate::store::BucketStore;
use crate::RateLimiter;
use bulwark_core::{EventListeners, FnListener};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the rate limiter.
#[derive(Clone)]
pub struct RateLimiterConfig {
    pub(crate) default_policy: BucketPolicy,
    pub(crate) policies: HashMap<String, BucketPolicy>,
    pub(crate) store_timeout: Duration,
    pub(crate) shards: usize,
    pub(crate) event_listeners: EventListeners<RateLimiterEvent>,
    pub(crate) name: String,
}

impl RateLimiterConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    /// Returns the policy for `key`.
    ///
    /// The part of the key before the first `:` names the policy
    /// (`user:42` uses the `user` policy). Keys without a known prefix use
    /// the default policy.
    pub fn policy_for(&self, key: &str) -> BucketPolicy {
        key.split_once(':')
            .and_then(|(prefix, _)| self.policies.get(prefix))
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Timeout applied to every shared-store round trip.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Name of this limiter.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for RateLimiterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterConfig")
            .field("name", &self.name)
            .field("default_policy", &self.default_policy)
            .field("policies", &self.policies)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

/// Builder for [`RateLimiterConfig`].
pub struct RateLimiterConfigBuilder {
    default_policy: BucketPolicy,
    policies: HashMap<String, BucketPolicy>,
    store_timeout: Duration,
    shards: usize,
    event_listeners: EventListeners<RateLimiterEvent>,
    name: String,
}

impl RateLimiterConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            default_policy: BucketPolicy::new(100, 10.0),
            policies: HashMap::new(),
            store_timeout: Duration::from_millis(50),
            shards: 16,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Sets the policy for keys without a known prefix.
    ///
    /// Default: capacity 100, 10 tokens per second
    pub fn default_policy(mut self, capacity: u32, refill_per_second: f64) -> Self {
        self.default_policy = BucketPolicy::new(capacity, refill_per_second);
        self
    }

    /// Adds a policy for keys starting with `<prefix>:`.
    pub fn policy(
        mut self,
        prefix: impl Into<String>,
        capacity: u32,
        refill_per_second: f64,
    ) -> Self {
        self.policies.insert(
            prefix.into(),
            BucketPolicy::new(capacity, refill_per_second),
        );
        self
    }

    /// Sets the timeout for shared-store round trips.
    ///
    /// Default: 50 milliseconds
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Sets the number of local bucket shards, rounded up to a power of two.
    ///
    /// Default: 16
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Names this limiter for events, logs and metrics.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback for denied checks, with the key and retry delay.
    pub fn on_denied<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RateLimiterEvent| {
                if let RateLimiterEvent::Denied {
                    key, retry_after, ..
                } = event
                {
                    f(key, *retry_after);
                }
            }));
        self
    }

    /// Registers a callback for checks that fell back to local enforcement.
    pub fn on_store_fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RateLimiterEvent| {
                if let RateLimiterEvent::StoreFallback { reason, .. } = event {
                    f(reason);
                }
            }));
        self
    }

    /// Checks the configuration without building it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_policy
            .validate()
            .map_err(|e| ConfigError::new(format!("default policy: {}", e)))?;
        for (prefix, policy) in &self.policies {
            if prefix.is_empty() || prefix.contains(':') {
                return Err(ConfigError::new(format!(
                    "invalid policy prefix '{}'",
                    prefix
                )));
            }
            policy
                .validate()
                .map_err(|e| ConfigError::new(format!("policy '{}': {}", prefix, e)))?;
        }
        if self.shards == 0 {
            return Err(ConfigError::new("shards must be at least 1"));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::new("store_timeout must be non-zero"));
        }
        Ok(())
    }

    /// Validates and finishes the builder into a configuration.
    pub fn into_config(self) -> Result<RateLimiterConfig, ConfigError> {
        self.validate()?;
        Ok(RateLimiterConfig {
            default_policy: self.default_policy,
            policies: self.policies,
            store_timeout: self.store_timeout,
            shards: self.shards,
            event_listeners: self.event_listeners,
            name: self.name,
        })
    }

    /// Builds a limiter that enforces budgets in this process only.
    pub fn try_build(self) -> Result<RateLimiter, ConfigError> {
        Ok(RateLimiter::new(self.into_config()?, None))
    }

    /// Builds a limiter that coordinates through a shared store and falls
    /// back to local enforcement when the store is unavailable.
    pub fn try_build_with_store(
        self,
        store: Arc<dyn BucketStore>,
    ) -> Result<RateLimiter, ConfigError> {
        Ok(RateLimiter::new(self.into_config()?, Some(store)))
    }

    /// Builds a local-only limiter.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid; see [`Self::try_build`].
    pub fn build(self) -> RateLimiter {
        match self.try_build() {
            Ok(limiter) => limiter,
            Err(err) => panic!("invalid rate limiter configuration: {}", err),
        }
    }
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_selects_policy() {
        let config = RateLimiterConfig::builder()
            .default_policy(10, 1.0)
            .policy("user", 5, 1.0)
            .policy("ip", 50, 5.0)
            .into_config()
            .unwrap();

        assert_eq!(config.policy_for("user:42").capacity, 5);
        assert_eq!(config.policy_for("ip:10.0.0.1").capacity, 50);
        assert_eq!(config.policy_for("api_key:abc").capacity, 10);
        assert_eq!(config.policy_for("anonymous").capacity, 10);
    }

    #[test]
    fn rejects_invalid_policies() {
        assert!(RateLimiterConfig::builder()
            .default_policy(0, 1.0)
            .validate()
            .is_err());
        assert!(RateLimiterConfig::builder()
            .policy("user", 5, -1.0)
            .validate()
            .is_err());
        assert!(RateLimiterConfig::builder()
            .policy("a:b", 5, 1.0)
            .validate()
            .is_err());
        assert!(RateLimiterConfig::builder().shards(0).validate().is_err());
    }
}
