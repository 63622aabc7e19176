//! Tagged adapter configuration.
//!
//! One variant per adapter kind. [`CacheAdapterConfig::build`] validates the
//! whole tree before constructing anything, so a bad combination fails at
//! startup rather than on the first request.
//!
//! With the `serde` feature the configuration deserializes from a `kind`
//! tagged map:
//!
//! ```json
//! { "kind": "multi_tier",
//!   "local": { "max_size": 5000, "default_ttl_ms": 60000 },
//!   "distributed": { "timeout_ms": 50 } }
//! ```

use crate::adapter::CacheAdapter;
use crate::distributed::{DistributedCache, RemoteStore};
use crate::error::ConfigError;
use crate::memory::MemoryCache;
use crate::multi_tier::MultiTierCache;
use crate::prompt::PromptCache;
use bulwark_circuitbreaker::CircuitBreakerRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Settings for an in-memory tier.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MemorySettings {
    /// Maximum number of entries.
    pub max_size: usize,
    /// TTL for writes without one, in milliseconds. `None` never expires.
    pub default_ttl_ms: Option<u64>,
    /// Number of independently locked shards.
    pub shards: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            default_ttl_ms: Some(300_000),
            shards: 16,
        }
    }
}

impl MemorySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::new("memory max_size must be at least 1"));
        }
        if self.shards == 0 {
            return Err(ConfigError::new("memory shards must be at least 1"));
        }
        if self.default_ttl_ms == Some(0) {
            return Err(ConfigError::new("memory default_ttl_ms must be non-zero"));
        }
        Ok(())
    }

    fn build(&self, name: &str) -> Result<MemoryCache, ConfigError> {
        MemoryCache::builder()
            .name(name)
            .max_size(self.max_size)
            .default_ttl(self.default_ttl_ms.map(Duration::from_millis))
            .shards(self.shards)
            .build()
    }
}

/// Settings for a distributed tier.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DistributedSettings {
    /// Timeout for each remote round trip, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for DistributedSettings {
    fn default() -> Self {
        Self { timeout_ms: 100 }
    }
}

impl DistributedSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::new("distributed timeout_ms must be non-zero"));
        }
        Ok(())
    }

    fn build(
        &self,
        name: &str,
        remote: Arc<dyn RemoteStore>,
        breakers: &CircuitBreakerRegistry,
    ) -> Result<DistributedCache, ConfigError> {
        DistributedCache::builder(remote)
            .name(name)
            .timeout(Duration::from_millis(self.timeout_ms))
            .breaker(breakers.get(&format!("{}.distributed", name)))
            .build()
    }
}

/// Configuration for one cache adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum CacheAdapterConfig {
    /// In-process LRU only.
    Memory(MemorySettings),
    /// Remote store only, guarded by a timeout and a breaker.
    Redis(DistributedSettings),
    /// Memory in front of a remote store.
    MultiTier {
        /// The local tier.
        #[cfg_attr(feature = "serde", serde(default))]
        local: MemorySettings,
        /// The distributed tier.
        #[cfg_attr(feature = "serde", serde(default))]
        distributed: DistributedSettings,
    },
    /// Prompt-normalizing cache over another adapter.
    Ai {
        /// Key prefix for this model or use case.
        namespace: String,
        /// The adapter holding the responses.
        inner: Box<CacheAdapterConfig>,
    },
}

impl Default for CacheAdapterConfig {
    fn default() -> Self {
        CacheAdapterConfig::Memory(MemorySettings::default())
    }
}

impl CacheAdapterConfig {
    /// Short label for the adapter kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheAdapterConfig::Memory(_) => "memory",
            CacheAdapterConfig::Redis(_) => "redis",
            CacheAdapterConfig::MultiTier { .. } => "multi_tier",
            CacheAdapterConfig::Ai { .. } => "ai",
        }
    }

    /// Returns true if building this adapter requires a remote store.
    pub fn needs_remote(&self) -> bool {
        match self {
            CacheAdapterConfig::Memory(_) => false,
            CacheAdapterConfig::Redis(_) | CacheAdapterConfig::MultiTier { .. } => true,
            CacheAdapterConfig::Ai { inner, .. } => inner.needs_remote(),
        }
    }

    /// Checks the configuration without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CacheAdapterConfig::Memory(memory) => memory.validate(),
            CacheAdapterConfig::Redis(distributed) => distributed.validate(),
            CacheAdapterConfig::MultiTier { local, distributed } => {
                local.validate()?;
                distributed.validate()
            }
            CacheAdapterConfig::Ai { namespace, inner } => {
                if namespace.trim().is_empty() {
                    return Err(ConfigError::new("ai namespace must not be empty"));
                }
                if matches!(**inner, CacheAdapterConfig::Ai { .. }) {
                    return Err(ConfigError::new("ai adapters cannot be nested"));
                }
                inner.validate()
            }
        }
    }

    /// Builds the adapter named `name`.
    ///
    /// `remote` is required for the `redis` and `multi_tier` kinds. Breakers
    /// for distributed tiers are taken from `breakers` under
    /// `<name>.distributed`, so they show up in the registry's health report.
    pub fn build(
        &self,
        name: &str,
        remote: Option<Arc<dyn RemoteStore>>,
        breakers: &CircuitBreakerRegistry,
    ) -> Result<Arc<dyn CacheAdapter>, ConfigError> {
        self.validate()?;
        if self.needs_remote() && remote.is_none() {
            return Err(ConfigError::new(format!(
                "cache '{}' of kind '{}' requires a remote store",
                name,
                self.kind()
            )));
        }
        self.build_validated(name, remote, breakers)
    }

    fn build_validated(
        &self,
        name: &str,
        remote: Option<Arc<dyn RemoteStore>>,
        breakers: &CircuitBreakerRegistry,
    ) -> Result<Arc<dyn CacheAdapter>, ConfigError> {
        let missing_remote = || ConfigError::new(format!("cache '{}' requires a remote store", name));

        let adapter: Arc<dyn CacheAdapter> = match self {
            CacheAdapterConfig::Memory(memory) => Arc::new(memory.build(name)?),
            CacheAdapterConfig::Redis(distributed) => {
                let remote = remote.ok_or_else(missing_remote)?;
                Arc::new(distributed.build(name, remote, breakers)?)
            }
            CacheAdapterConfig::MultiTier { local, distributed } => {
                let remote = remote.ok_or_else(missing_remote)?;
                let local = local.build(&format!("{}.local", name))?;
                let local_ttl = local.default_ttl();
                let distributed = distributed.build(name, remote, breakers)?;
                Arc::new(
                    MultiTierCache::builder(Arc::new(local), distributed)
                        .name(name)
                        .local_ttl(local_ttl)
                        .build(),
                )
            }
            CacheAdapterConfig::Ai { namespace, inner } => {
                let inner = inner.build_validated(name, remote, breakers)?;
                Arc::new(PromptCache::new(inner, namespace.as_str()).with_name(name))
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(cache = name, kind = self.kind(), "built cache adapter");

        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::RemoteValue;
    use crate::error::CacheError;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct NullStore;

    #[async_trait]
    impl RemoteStore for NullStore {
        async fn get(&self, _key: &str) -> Result<Option<RemoteValue>, CacheError> {
            Ok(None)
        }
        async fn set(&self, _: &str, _: Bytes, _: Option<Duration>) -> Result<(), CacheError> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[test]
    fn remote_kinds_require_a_store() {
        let breakers = CircuitBreakerRegistry::default();
        let config = CacheAdapterConfig::MultiTier {
            local: MemorySettings::default(),
            distributed: DistributedSettings::default(),
        };
        let err = match config.build("sessions", None, &breakers) {
            Ok(_) => panic!("multi-tier without a remote store should not build"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("requires a remote store"));

        let adapter = config
            .build("sessions", Some(Arc::new(NullStore)), &breakers)
            .unwrap();
        assert_eq!(adapter.name(), "sessions");
        assert_eq!(breakers.len(), 1);
        assert_eq!(breakers.breakers()[0].name(), "sessions.distributed");
    }

    #[test]
    fn nested_ai_is_rejected() {
        let config = CacheAdapterConfig::Ai {
            namespace: "outer".into(),
            inner: Box::new(CacheAdapterConfig::Ai {
                namespace: "inner".into(),
                inner: Box::default(),
            }),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_memory_settings_are_rejected() {
        let config = CacheAdapterConfig::Memory(MemorySettings {
            max_size: 0,
            ..Default::default()
        });
        assert!(config
            .build("m", None, &CircuitBreakerRegistry::default())
            .is_err());
    }

    #[tokio::test]
    async fn ai_over_memory_builds_without_remote() {
        let config = CacheAdapterConfig::Ai {
            namespace: "chat".into(),
            inner: Box::default(),
        };
        let adapter = config
            .build("prompts", None, &CircuitBreakerRegistry::default())
            .unwrap();
        adapter
            .set("Hello  World", Bytes::from_static(b"hi"), None)
            .await
            .unwrap();
        assert_eq!(
            adapter.get("hello world").await.unwrap(),
            Some(Bytes::from_static(b"hi"))
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_tagged_config() {
        let config: CacheAdapterConfig = serde_json::from_str(
            r#"{"kind":"multi_tier","local":{"max_size":50},"distributed":{"timeout_ms":20}}"#,
        )
        .unwrap();
        assert_eq!(
            config,
            CacheAdapterConfig::MultiTier {
                local: MemorySettings {
                    max_size: 50,
                    ..Default::default()
                },
                distributed: DistributedSettings { timeout_ms: 20 },
            }
        );

        let unknown = serde_json::from_str::<CacheAdapterConfig>(r#"{"kind":"memcached"}"#);
        assert!(unknown.is_err());
    }
}
