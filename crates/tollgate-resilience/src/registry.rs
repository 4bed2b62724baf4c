use std::sync::Arc;

use dashmap::DashMap;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

/// Process-wide breakers keyed by command key.
///
/// Unrelated keys live in different shards and never contend. Callers of a
/// key that use the same configuration share one breaker; a distinct
/// configuration for the same key gets its own breaker, so rules with
/// different overrides never reset each other.
pub struct BreakerRegistry {
    breakers: DashMap<String, Vec<Arc<CircuitBreaker>>>,
    defaults: CircuitBreakerConfig,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl BreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
        }
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// The breaker for `key` under `config` (or the defaults), created on
    /// first use.
    pub fn get(&self, key: &str, config: Option<&CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        let config = config.unwrap_or(&self.defaults);
        if let Some(existing) = self.breakers.get(key) {
            if let Some(breaker) = existing.iter().find(|b| b.config() == config) {
                return Arc::clone(breaker);
            }
        }

        let mut entry = self.breakers.entry(key.to_string()).or_default();
        if let Some(breaker) = entry.iter().find(|b| b.config() == config) {
            return Arc::clone(breaker);
        }
        if !entry.is_empty() {
            tracing::info!(command_key = %key, "circuit breaker added for new configuration");
        }
        let breaker = Arc::new(CircuitBreaker::new(config.clone()));
        entry.push(Arc::clone(&breaker));
        breaker
    }

    /// Current state for `key`, if a breaker exists. With several
    /// configurations, an open breaker wins over a half-open one, which
    /// wins over closed.
    pub fn state(&self, key: &str) -> Option<CircuitState> {
        let breakers = self.breakers.get(key)?;
        breakers.iter().map(|b| b.state()).max_by_key(|state| match state {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        })
    }

    /// Number of command keys with at least one breaker.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
