//! Rolling health/cost metrics kept per adapter, independent of the load
//! balancer's per-instance counters.

use std::sync::Mutex;
use std::time::Instant;

/// Coarse health classification derived from recent request outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

#[derive(Debug, Default)]
struct Counters {
    requests_total: u64,
    requests_successful: u64,
    total_tokens: u64,
    total_cost: f64,
    total_latency_ms: f64,
    last_request_at: Option<Instant>,
}

/// Tracks success rate, latency, token and cost totals for one adapter.
///
/// Distinct from [`gateway_loadbalancer::LoadBalancerRegistry`]'s per-instance
/// stats: this is adapter-wide (all instances of one backend pooled
/// together), used for the adapter's own `health()` probe and for cost
/// reporting, not for instance selection.
#[derive(Debug)]
pub struct ProviderMetrics {
    counters: Mutex<Counters>,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn record_request(&self, success: bool, latency_ms: f64, tokens: u64, cost: f64) {
        let mut c = self.counters.lock().unwrap();
        c.requests_total += 1;
        c.total_latency_ms += latency_ms;
        c.total_tokens += tokens;
        c.total_cost += cost;
        c.last_request_at = Some(Instant::now());
        if success {
            c.requests_successful += 1;
        }
    }

    pub fn success_rate(&self) -> f64 {
        let c = self.counters.lock().unwrap();
        if c.requests_total == 0 {
            1.0
        } else {
            c.requests_successful as f64 / c.requests_total as f64
        }
    }

    pub fn average_latency_ms(&self) -> f64 {
        let c = self.counters.lock().unwrap();
        if c.requests_total == 0 {
            0.0
        } else {
            c.total_latency_ms / c.requests_total as f64
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.counters.lock().unwrap().total_cost
    }

    /// Derives a status from recent activity, success rate and latency.
    /// Mirrors the adapter-level health check a deployment dashboard polls;
    /// the load balancer's own health score is the one that gates routing.
    pub fn status(&self) -> ProviderStatus {
        let c = self.counters.lock().unwrap();
        let Some(last) = c.last_request_at else {
            return ProviderStatus::Offline;
        };
        if last.elapsed() > std::time::Duration::from_secs(300) {
            return ProviderStatus::Offline;
        }
        let success_rate = if c.requests_total == 0 {
            1.0
        } else {
            c.requests_successful as f64 / c.requests_total as f64
        };
        if success_rate < 0.5 {
            return ProviderStatus::Unhealthy;
        }
        if success_rate < 0.8 {
            return ProviderStatus::Degraded;
        }
        let avg_latency = if c.requests_total == 0 {
            0.0
        } else {
            c.total_latency_ms / c.requests_total as f64
        };
        if avg_latency > 5000.0 {
            return ProviderStatus::Degraded;
        }
        ProviderStatus::Healthy
    }
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_requests_is_offline() {
        let metrics = ProviderMetrics::new();
        assert_eq!(metrics.status(), ProviderStatus::Offline);
    }

    #[test]
    fn mostly_successful_requests_are_healthy() {
        let metrics = ProviderMetrics::new();
        for _ in 0..9 {
            metrics.record_request(true, 100.0, 50, 0.01);
        }
        metrics.record_request(false, 100.0, 0, 0.0);
        assert_eq!(metrics.status(), ProviderStatus::Healthy);
        assert!((metrics.success_rate() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn mostly_failing_requests_are_unhealthy() {
        let metrics = ProviderMetrics::new();
        for _ in 0..8 {
            metrics.record_request(false, 50.0, 0, 0.0);
        }
        for _ in 0..2 {
            metrics.record_request(true, 50.0, 10, 0.001);
        }
        assert_eq!(metrics.status(), ProviderStatus::Unhealthy);
    }
}
