use crate::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Hands out one independent [`CircuitBreaker`] per operation name.
///
/// Breakers are created lazily from a template configuration the first time
/// a name is requested. Each breaker has its own lock; the registry lock is
/// only held while looking up or inserting an entry.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    template: CircuitBreakerConfig,
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry whose breakers copy `template`, renamed per
    /// operation.
    pub fn new(template: CircuitBreakerConfig) -> Self {
        Self {
            template,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn get(&self, name: &str) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }

        self.breakers
            .write()
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.template.with_name(name)))
            .clone()
    }

    /// Registers a breaker with its own configuration, replacing any
    /// breaker already stored under the same name.
    pub fn insert(&self, breaker: CircuitBreaker) {
        self.breakers
            .write()
            .insert(breaker.name().to_string(), breaker);
    }

    /// Returns every breaker created so far.
    pub fn breakers(&self) -> Vec<CircuitBreaker> {
        self.breakers.read().values().cloned().collect()
    }

    /// Returns metrics for every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, CircuitMetrics)> {
        let mut snapshot: Vec<_> = self
            .breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.metrics()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// Number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Returns true if no breaker has been created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.len())
            .finish()
    }
}
