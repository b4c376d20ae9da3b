//! Typed configuration for the pipeline coordinator (design §6).
//!
//! Every section mirrors one component's tunables. Unknown keys are a
//! load-time error (`deny_unknown_fields`) rather than a silently ignored
//! key, per the "duck-typed config dictionaries" redesign note: operators
//! fix a typo once instead of debugging a default that quietly won.

use gateway_loadbalancer::LoadBalancingStrategy;
use gateway_ratelimiter::{Algorithm as RateLimiterAlgorithm, Tier, TierLimits};
use gateway_router::RoutingStrategyName;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RouterConfig {
    /// Strategy forced on every routing decision. `None` defers to the
    /// router's own observation-count/capability heuristic (design §4.2).
    pub default_strategy: Option<RoutingStrategyNameConfig>,
    pub history_window: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_strategy: None,
            history_window: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategyNameConfig {
    CostOptimized,
    PerformanceOptimized,
    CapabilityBased,
    Adaptive,
}

impl From<RoutingStrategyNameConfig> for RoutingStrategyName {
    fn from(value: RoutingStrategyNameConfig) -> Self {
        match value {
            RoutingStrategyNameConfig::CostOptimized => RoutingStrategyName::CostOptimized,
            RoutingStrategyNameConfig::PerformanceOptimized => RoutingStrategyName::PerformanceOptimized,
            RoutingStrategyNameConfig::CapabilityBased => RoutingStrategyName::CapabilityBased,
            RoutingStrategyNameConfig::Adaptive => RoutingStrategyName::Adaptive,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExecutorConfig {
    pub max_attempts: usize,
    pub base_retry_delay_ms: u64,
    pub exponential_backoff: bool,
    pub per_attempt_deadline_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_retry_delay_ms: 100,
            exponential_backoff: true,
            per_attempt_deadline_ms: 10_000,
        }
    }
}

impl ExecutorConfig {
    pub fn per_attempt_deadline(&self) -> Duration {
        Duration::from_millis(self.per_attempt_deadline_ms)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BreakerConfig {
    /// Consecutive failures (design §4.3 uses a plain count; the
    /// underlying `gateway-circuitbreaker` crate tracks a failure *rate*
    /// over a count-based window, so this is translated into
    /// `minimum_number_of_calls = failure_threshold` with the window sized
    /// to match — see `PipelineCoordinator::circuit_breaker_config`).
    pub failure_threshold: usize,
    pub recovery_timeout_s: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 4,
            recovery_timeout_s: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoadBalancerConfig {
    pub strategy: LoadBalancingStrategyConfig,
    pub health_check_interval_s: u64,
    /// Documented for operator visibility; the health floor below which an
    /// instance is marked unavailable is fixed at 0.2 inside
    /// `gateway-loadbalancer::registry` and is not currently overridable.
    pub health_floor: f64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategyConfig::Adaptive,
            health_check_interval_s: 30,
            health_floor: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategyConfig {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    LeastResponseTime,
    Random,
    ConsistentHash,
    Adaptive,
}

impl From<LoadBalancingStrategyConfig> for LoadBalancingStrategy {
    fn from(value: LoadBalancingStrategyConfig) -> Self {
        match value {
            LoadBalancingStrategyConfig::RoundRobin => LoadBalancingStrategy::RoundRobin,
            LoadBalancingStrategyConfig::WeightedRoundRobin => LoadBalancingStrategy::WeightedRoundRobin,
            LoadBalancingStrategyConfig::LeastConnections => LoadBalancingStrategy::LeastConnections,
            LoadBalancingStrategyConfig::LeastResponseTime => LoadBalancingStrategy::LeastResponseTime,
            LoadBalancingStrategyConfig::Random => LoadBalancingStrategy::Random,
            LoadBalancingStrategyConfig::ConsistentHash => LoadBalancingStrategy::ConsistentHash,
            LoadBalancingStrategyConfig::Adaptive => LoadBalancingStrategy::Adaptive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    Off,
    Exact,
    Semantic,
    Hybrid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub mode: CacheMode,
    pub ttl_s: u64,
    pub similarity_threshold: f32,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Hybrid,
            ttl_s: 3600,
            similarity_threshold: 0.95,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimiterConfig {
    pub algorithm: RateLimiterAlgorithmConfig,
    /// Per-tier overrides of `gateway_ratelimiter::TierDefaults::standard()`.
    /// Tiers not listed here keep the standard default.
    #[serde(default)]
    pub tier_overrides: HashMap<TierConfig, TierLimitsConfig>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            algorithm: RateLimiterAlgorithmConfig::TokenBucket,
            tier_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimiterAlgorithmConfig {
    TokenBucket,
    SlidingWindow,
    Distributed,
    Adaptive,
}

impl From<RateLimiterAlgorithmConfig> for RateLimiterAlgorithm {
    fn from(value: RateLimiterAlgorithmConfig) -> Self {
        match value {
            RateLimiterAlgorithmConfig::TokenBucket => RateLimiterAlgorithm::TokenBucket,
            RateLimiterAlgorithmConfig::SlidingWindow => RateLimiterAlgorithm::SlidingWindow,
            RateLimiterAlgorithmConfig::Distributed => RateLimiterAlgorithm::Distributed,
            RateLimiterAlgorithmConfig::Adaptive => RateLimiterAlgorithm::Adaptive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierConfig {
    Free,
    Starter,
    Professional,
    Enterprise,
}

impl From<TierConfig> for Tier {
    fn from(value: TierConfig) -> Self {
        match value {
            TierConfig::Free => Tier::Free,
            TierConfig::Starter => Tier::Starter,
            TierConfig::Professional => Tier::Professional,
            TierConfig::Enterprise => Tier::Enterprise,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierLimitsConfig {
    pub requests_per_minute: u64,
    pub tokens_per_day: u64,
    pub concurrent_connections: u32,
}

impl From<TierLimitsConfig> for TierLimits {
    fn from(value: TierLimitsConfig) -> Self {
        TierLimits {
            requests_per_minute: value.requests_per_minute,
            tokens_per_day: value.tokens_per_day,
            concurrent_connections: value.concurrent_connections,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StreamingSettings {
    pub heartbeat_interval_s: u64,
    pub heartbeat_timeout_s: u64,
    pub max_connections_per_user: usize,
    pub max_message_size_bytes: usize,
    pub reconnect_window_s: u64,
    pub outbound_queue_capacity: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        let defaults = gateway_streaming::StreamingConfig::default();
        Self {
            heartbeat_interval_s: defaults.heartbeat_interval_s,
            heartbeat_timeout_s: defaults.heartbeat_timeout_s,
            max_connections_per_user: defaults.max_connections_per_user,
            max_message_size_bytes: defaults.max_message_size_bytes,
            reconnect_window_s: defaults.reconnect_window_s,
            outbound_queue_capacity: defaults.outbound_queue_capacity,
        }
    }
}

impl From<StreamingSettings> for gateway_streaming::StreamingConfig {
    fn from(value: StreamingSettings) -> Self {
        gateway_streaming::StreamingConfig {
            heartbeat_interval_s: value.heartbeat_interval_s,
            heartbeat_timeout_s: value.heartbeat_timeout_s,
            max_connections_per_user: value.max_connections_per_user,
            max_message_size_bytes: value.max_message_size_bytes,
            reconnect_window_s: value.reconnect_window_s,
            outbound_queue_capacity: value.outbound_queue_capacity,
        }
    }
}

/// Top-level, `serde`-deserializable configuration for one gateway
/// deployment (design §6). Loaded once at startup from TOML, or built
/// programmatically (`GatewayConfig::default()`) for tests.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    pub router: RouterConfig,
    pub executor: ExecutorConfig,
    pub breaker: BreakerConfig,
    pub load_balancer: LoadBalancerConfig,
    pub cache: CacheConfig,
    pub rate_limiter: RateLimiterConfig,
    pub streaming: StreamingSettings,
}

impl GatewayConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cache_mode_is_hybrid() {
        let config = GatewayConfig::default();
        assert_eq!(config.cache.mode, CacheMode::Hybrid);
    }

    #[test]
    fn cache_mode_deserializes_from_snake_case() {
        let source = r#"
            [cache]
            mode = "semantic"
        "#;
        let config = GatewayConfig::from_toml_str(source).unwrap();
        assert_eq!(config.cache.mode, CacheMode::Semantic);
    }

    #[test]
    fn unknown_key_is_a_load_error_not_a_silent_default() {
        let source = r#"
            [router]
            default_strategy = "cost_optimized"
            histroy_window = 10
        "#;
        assert!(GatewayConfig::from_toml_str(source).is_err());
    }

    #[test]
    fn tier_overrides_deserialize() {
        let source = r#"
            [rate_limiter]
            algorithm = "token_bucket"

            [rate_limiter.tier_overrides.free]
            requests_per_minute = 5
            tokens_per_day = 10000
            concurrent_connections = 1
        "#;
        let config = GatewayConfig::from_toml_str(source).unwrap();
        let limits = config.rate_limiter.tier_overrides.get(&TierConfig::Free).unwrap();
        assert_eq!(limits.requests_per_minute, 5);
    }
}
