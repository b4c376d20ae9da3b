//! Keyed circuit breaker registry.
//!
//! The gateway needs one circuit breaker per `(provider, model)` pair rather
//! than one per wrapped [`tower::Service`] — a fleet of models shares the
//! same executor, and each must fail independently (design §3, `CircuitBreaker`).
//! This module lazily creates a [`Circuit`] + [`CircuitBreakerConfig`] pair
//! per key the first time it's touched, reusing the existing count/time
//! sliding-window machinery unchanged.

use crate::circuit::Circuit;
use crate::config::CircuitBreakerConfig;
use crate::CircuitState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Identifies a breaker: the `(provider, model)` pair from the design's data
/// model.
pub type BreakerKey = (String, String);

struct Entry {
    circuit: AsyncMutex<Circuit>,
    state_atomic: Arc<AtomicU8>,
}

/// A registry of independent circuit breakers keyed by `(provider, model)`.
///
/// Construct one per deployment via [`CircuitBreakerRegistry::new`], sharing
/// it (behind an `Arc`) between the fallback executor and any operational
/// introspection endpoints.
pub struct CircuitBreakerRegistry {
    config: Arc<CircuitBreakerConfig<(), ()>>,
    entries: std::sync::RwLock<HashMap<BreakerKey, Arc<Entry>>>,
}

impl CircuitBreakerRegistry {
    /// Builds a registry where every key shares the same breaker
    /// configuration (failure threshold, recovery timeout, ...).
    pub fn new(config: CircuitBreakerConfig<(), ()>) -> Self {
        Self {
            config: Arc::new(config),
            entries: std::sync::RwLock::new(HashMap::new()),
        }
    }

    fn entry_for(&self, key: &BreakerKey) -> Arc<Entry> {
        if let Some(entry) = self.entries.read().unwrap().get(key) {
            return Arc::clone(entry);
        }

        let mut entries = self.entries.write().unwrap();
        entries
            .entry(key.clone())
            .or_insert_with(|| {
                let state_atomic = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
                Arc::new(Entry {
                    circuit: AsyncMutex::new(Circuit::new_with_atomic(Arc::clone(&state_atomic))),
                    state_atomic,
                })
            })
            .clone()
    }

    /// Returns `true` if a call to `(provider, model)` may proceed right now.
    ///
    /// Transitions open → half-open internally when the recovery timeout has
    /// elapsed, matching the design's `closed/open/half-open` state machine.
    pub async fn try_acquire(&self, provider: &str, model: &str) -> bool {
        let key = (provider.to_string(), model.to_string());
        let entry = self.entry_for(&key);
        let mut circuit = entry.circuit.lock().await;
        circuit.try_acquire(&self.config)
    }

    /// Records a successful call against `(provider, model)`.
    pub async fn record_success(&self, provider: &str, model: &str, duration: Duration) {
        let key = (provider.to_string(), model.to_string());
        let entry = self.entry_for(&key);
        let mut circuit = entry.circuit.lock().await;
        circuit.record_success(&self.config, duration);
    }

    /// Records a failed call against `(provider, model)`.
    pub async fn record_failure(&self, provider: &str, model: &str, duration: Duration) {
        let key = (provider.to_string(), model.to_string());
        let entry = self.entry_for(&key);
        let mut circuit = entry.circuit.lock().await;
        circuit.record_failure(&self.config, duration);
    }

    /// Returns the current state without requiring async context, for
    /// health-check/introspection endpoints. Unknown keys read as `Closed`
    /// (no breaker has been created for them yet, so no failures are on
    /// record).
    pub fn state_sync(&self, provider: &str, model: &str) -> CircuitState {
        let key = (provider.to_string(), model.to_string());
        match self.entries.read().unwrap().get(&key) {
            Some(entry) => CircuitState::from_u8(entry.state_atomic.load(Ordering::Acquire)),
            None => CircuitState::Closed,
        }
    }

    /// Forces `(provider, model)`'s breaker open, e.g. from an out-of-band
    /// health probe (see `gateway_core::HealthTriggerable`).
    pub async fn force_open(&self, provider: &str, model: &str) {
        let key = (provider.to_string(), model.to_string());
        let entry = self.entry_for(&key);
        let mut circuit = entry.circuit.lock().await;
        circuit.force_open(&self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use std::time::Duration;

    fn test_registry() -> CircuitBreakerRegistry {
        let config = CircuitBreakerConfig::<(), ()>::builder()
            .failure_rate_threshold(0.5)
            .sliding_window_size(4)
            .minimum_number_of_calls(4)
            .wait_duration_in_open(Duration::from_millis(50))
            .build_config();
        CircuitBreakerRegistry::new(config)
    }

    #[tokio::test]
    async fn independent_keys_have_independent_state() {
        let registry = test_registry();
        for _ in 0..4 {
            registry
                .record_failure("openai", "gpt-4", Duration::from_millis(1))
                .await;
        }
        assert_eq!(registry.state_sync("openai", "gpt-4"), CircuitState::Open);
        assert_eq!(
            registry.state_sync("anthropic", "claude-3-opus"),
            CircuitState::Closed
        );
        assert!(!registry.try_acquire("openai", "gpt-4").await);
        assert!(registry.try_acquire("anthropic", "claude-3-opus").await);
    }

    #[tokio::test]
    async fn half_open_after_recovery_timeout() {
        let registry = test_registry();
        for _ in 0..4 {
            registry
                .record_failure("openai", "gpt-4", Duration::from_millis(1))
                .await;
        }
        assert_eq!(registry.state_sync("openai", "gpt-4"), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.try_acquire("openai", "gpt-4").await);
        assert_eq!(
            registry.state_sync("openai", "gpt-4"),
            CircuitState::HalfOpen
        );
    }
}
