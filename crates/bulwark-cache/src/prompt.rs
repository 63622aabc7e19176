//! Cache for model prompt responses.
//!
//! Prompts that differ only in case or whitespace map to the same entry.

use crate::adapter::{CacheAdapter, CacheStats, WriteOutcome};
use crate::error::CacheError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Normalizes prompts into namespaced keys before delegating to an inner
/// adapter.
#[derive(Clone)]
pub struct PromptCache {
    inner: Arc<dyn CacheAdapter>,
    namespace: String,
    name: String,
}

impl PromptCache {
    /// Wraps `inner`, prefixing every key with `namespace`.
    pub fn new(inner: Arc<dyn CacheAdapter>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            name: format!("{}.prompt", inner.name()),
            inner,
            namespace,
        }
    }

    /// Names the cache.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The key under which `prompt` is stored.
    pub fn key_for(&self, prompt: &str) -> String {
        let mut key = String::with_capacity(self.namespace.len() + prompt.len() + 1);
        key.push_str(&self.namespace);
        key.push(':');
        for (i, word) in prompt.split_whitespace().enumerate() {
            if i > 0 {
                key.push(' ');
            }
            key.extend(word.chars().flat_map(char::to_lowercase));
        }
        key
    }
}

impl std::fmt::Debug for PromptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptCache")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("inner", &self.inner.name())
            .finish()
    }
}

#[async_trait]
impl CacheAdapter for PromptCache {
    async fn get(&self, prompt: &str) -> Result<Option<Bytes>, CacheError> {
        self.inner.get(&self.key_for(prompt)).await
    }

    async fn set(
        &self,
        prompt: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome, CacheError> {
        self.inner.set(&self.key_for(prompt), value, ttl).await
    }

    async fn delete(&self, prompt: &str) -> Result<WriteOutcome, CacheError> {
        self.inner.delete(&self.key_for(prompt)).await
    }

    async fn clear(&self) -> Result<WriteOutcome, CacheError> {
        self.inner.clear().await
    }

    async fn reconcile(&self) -> Result<usize, CacheError> {
        self.inner.reconcile().await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
