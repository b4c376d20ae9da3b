//! Instance selection strategies.

/// Strategy used by [`crate::LoadBalancerRegistry`] to pick among the
/// available replicas of a `(provider, model)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    /// Cycle through available instances in order.
    RoundRobin,
    /// Round-robin weighted by each instance's configured `weight`.
    WeightedRoundRobin,
    /// Prefer the instance with fewest in-flight requests.
    LeastConnections,
    /// Prefer the instance with the lowest EMA response time.
    LeastResponseTime,
    /// Pick uniformly at random among available instances.
    Random,
    /// Hash the caller-supplied request key onto a ring of virtual nodes,
    /// for session stickiness.
    ConsistentHash,
    /// Blend health, load, latency and recent-error signals into a score
    /// and weighted-randomly pick among the top 3.
    Adaptive,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::WeightedRoundRobin
    }
}
