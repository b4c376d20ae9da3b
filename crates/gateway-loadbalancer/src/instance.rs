//! Provider instance registration and the health/latency counters the
//! registry tracks for each one.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Static configuration for one replica of a `(provider, model)` pair.
#[derive(Debug, Clone)]
pub struct ProviderInstance {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub weight: u32,
    pub max_connections: u32,
}

impl ProviderInstance {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            weight: 1,
            max_connections: 100,
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Mutable counters backing one registered instance. Kept behind an `Arc` so
/// both the per-`(provider, model)` pool and the flat by-id index share the
/// same cell.
#[derive(Debug)]
pub(crate) struct InstanceStats {
    pub current_connections: AtomicU32,
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    pub avg_response_time_ms: Mutex<f64>,
    pub last_error_at: Mutex<Option<Instant>>,
    pub health_score: Mutex<f64>,
    pub available: AtomicBool,
}

impl InstanceStats {
    pub fn new() -> Self {
        Self {
            current_connections: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            avg_response_time_ms: Mutex::new(0.0),
            last_error_at: Mutex::new(None),
            health_score: Mutex::new(1.0),
            available: AtomicBool::new(true),
        }
    }
}

/// A handle to one selected instance, returned by
/// [`crate::LoadBalancerRegistry::select_instance`]. Implements
/// [`gateway_fallback::Instance`] so the fallback executor can drive it
/// directly without knowing about this crate's concrete types.
pub struct ManagedInstance {
    pub(crate) config: ProviderInstance,
    pub(crate) stats: std::sync::Arc<InstanceStats>,
}

impl ManagedInstance {
    pub fn provider_instance(&self) -> &ProviderInstance {
        &self.config
    }

    pub fn health_score(&self) -> f64 {
        *self.stats.health_score.lock().unwrap()
    }
}

impl gateway_fallback::Instance for ManagedInstance {
    fn instance_id(&self) -> &str {
        &self.config.id
    }

    fn provider(&self) -> &str {
        &self.config.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}
