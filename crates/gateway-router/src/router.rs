//! The orchestrator: owns the profile table and strategy-selection
//! heuristic, dispatches to one of the four strategies, and folds feedback
//! back into the adaptive strategy's history and the profiles' latency EMA.

use crate::error::RouterError;
use crate::events::RouterEvent;
use crate::profiles::default_model_profiles;
use crate::strategy::{self, AdaptiveHistory};
use crate::task::{detect_task_type, estimate_tokens, required_capabilities};
use crate::types::{ModelProfile, RoutingContext, RoutingDecision, RoutingStrategyName, TaskType};
use gateway_core::events::EventListeners;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

const ADAPTIVE_HISTORY_THRESHOLD: usize = 100;
const CAPABILITY_BASED_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Default)]
struct RoutingStats {
    decisions_per_strategy: HashMap<&'static str, u64>,
    total_estimated_cost: f64,
    total_estimated_latency_ms: f64,
    total_requests: u64,
}

/// Aggregate, read-only routing statistics surfaced for operational
/// visibility; never gates a routing decision.
#[derive(Debug, Clone)]
pub struct RoutingStatsSnapshot {
    pub total_requests: u64,
    pub decisions_per_strategy: HashMap<&'static str, u64>,
    pub avg_estimated_cost: f64,
    pub avg_estimated_latency_ms: f64,
}

/// Given a request context, returns a ranked `FallbackChain` (here, a
/// `(provider, model)` decision plus fallbacks) and a one-line rationale.
pub struct ModelRouter {
    profiles: RwLock<Vec<ModelProfile>>,
    adaptive_history: AdaptiveHistory,
    stats: Mutex<RoutingStats>,
    observation_count: Mutex<usize>,
    event_listeners: EventListeners<RouterEvent>,
    name: String,
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(default_model_profiles()),
            adaptive_history: AdaptiveHistory::new(),
            stats: Mutex::new(RoutingStats::default()),
            observation_count: Mutex::new(0),
            event_listeners: EventListeners::new(),
            name: "router".to_string(),
        }
    }

    pub fn with_profiles(profiles: Vec<ModelProfile>) -> Self {
        let mut router = Self::new();
        router.profiles = RwLock::new(profiles);
        router
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_event<L>(&mut self, listener: L)
    where
        L: gateway_core::events::EventListener<RouterEvent> + 'static,
    {
        self.event_listeners.add(listener);
    }

    fn emit(&self, event: RouterEvent) {
        self.event_listeners.emit(&event);
    }

    /// Chooses a strategy when the caller doesn't pin one, per the
    /// heuristic: adaptive once there's enough history, capability-based
    /// for heavily-constrained requests, performance for demanding task
    /// types, cost-optimized otherwise.
    fn select_strategy(&self, context: &RoutingContext) -> RoutingStrategyName {
        if *self.observation_count.lock().unwrap() > ADAPTIVE_HISTORY_THRESHOLD {
            return RoutingStrategyName::Adaptive;
        }
        if context.required_capabilities.len() > CAPABILITY_BASED_THRESHOLD {
            return RoutingStrategyName::CapabilityBased;
        }
        if matches!(
            context.task_type,
            Some(TaskType::CodeGeneration) | Some(TaskType::Reasoning) | Some(TaskType::CreativeWriting)
        ) {
            return RoutingStrategyName::PerformanceOptimized;
        }
        RoutingStrategyName::CostOptimized
    }

    /// Routes a bare query string, running task-type detection and
    /// capability inference before dispatching to a strategy.
    pub fn route_query(
        &self,
        query: &str,
        tenant_tier: &str,
        strategy: Option<RoutingStrategyName>,
    ) -> Result<RoutingDecision, RouterError> {
        let task_type = detect_task_type(query);
        let mut context = RoutingContext::new(query, tenant_tier);
        context.token_count = estimate_tokens(query);
        context.required_capabilities = required_capabilities(query, task_type);
        context.task_type = Some(task_type);
        self.route(context, strategy)
    }

    /// Routes an already-built context, for callers that have their own
    /// task-type detection or additional constraints to set.
    pub fn route(
        &self,
        context: RoutingContext,
        strategy: Option<RoutingStrategyName>,
    ) -> Result<RoutingDecision, RouterError> {
        let strategy = strategy.unwrap_or_else(|| self.select_strategy(&context));
        let profiles = self.profiles.read().unwrap().clone();

        let result = match strategy {
            RoutingStrategyName::CostOptimized => strategy::cost_optimized(&context, &profiles),
            RoutingStrategyName::PerformanceOptimized => strategy::performance_optimized(&context, &profiles),
            RoutingStrategyName::CapabilityBased => strategy::capability_based(&context, &profiles),
            RoutingStrategyName::Adaptive => strategy::adaptive(&context, &profiles, &self.adaptive_history),
        };

        match &result {
            Ok(decision) => {
                self.record_routing(decision);
                self.emit(RouterEvent::Routed {
                    pattern_name: self.name.clone(),
                    timestamp: Instant::now(),
                    strategy: decision.strategy_used,
                    provider: decision.primary_provider.clone(),
                    model: decision.primary_model.clone(),
                    score: decision.score,
                });
            }
            Err(RouterError::NoEligibleModels) | Err(RouterError::ContextWindowExceeded) => {
                self.emit(RouterEvent::NoEligibleModels {
                    pattern_name: self.name.clone(),
                    timestamp: Instant::now(),
                    tenant_tier: context.tenant_tier.clone(),
                });
            }
        }

        result
    }

    fn record_routing(&self, decision: &RoutingDecision) {
        let mut stats = self.stats.lock().unwrap();
        stats.total_requests += 1;
        *stats.decisions_per_strategy.entry(decision.strategy_used.as_str()).or_insert(0) += 1;
        stats.total_estimated_cost += decision.estimated_cost;
        stats.total_estimated_latency_ms += decision.estimated_latency_ms;
    }

    /// Feeds an actual outcome back into the adaptive strategy's history and
    /// nudges the matching profile's latency EMA (smoothing α = 0.05).
    pub fn update_observation(&self, provider: &str, model: &str, success: bool, actual_latency_ms: f64, actual_cost: f64) {
        self.adaptive_history.record(provider, model, success, actual_latency_ms, actual_cost);

        *self.observation_count.lock().unwrap() += 1;

        const ALPHA: f64 = 0.05;
        let mut profiles = self.profiles.write().unwrap();
        if let Some(profile) = profiles.iter_mut().find(|p| p.provider == provider && p.model == model) {
            profile.avg_latency_ms = (1.0 - ALPHA) * profile.avg_latency_ms + ALPHA * actual_latency_ms;
        }
    }

    pub fn routing_stats(&self) -> RoutingStatsSnapshot {
        let stats = self.stats.lock().unwrap();
        let (avg_cost, avg_latency) = if stats.total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                stats.total_estimated_cost / stats.total_requests as f64,
                stats.total_estimated_latency_ms / stats.total_requests as f64,
            )
        };
        RoutingStatsSnapshot {
            total_requests: stats.total_requests,
            decisions_per_strategy: stats.decisions_per_strategy.clone(),
            avg_estimated_cost: avg_cost,
            avg_estimated_latency_ms: avg_latency,
        }
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_query_detects_code_task_and_prefers_performance() {
        let router = ModelRouter::new();
        let decision = router.route_query("please fix this function", "enterprise", None).unwrap();
        assert_eq!(decision.strategy_used, RoutingStrategyName::PerformanceOptimized);
    }

    #[test]
    fn route_query_defaults_to_cost_optimized_for_plain_chat() {
        let router = ModelRouter::new();
        let decision = router.route_query("hello there", "enterprise", None).unwrap();
        assert_eq!(decision.strategy_used, RoutingStrategyName::CostOptimized);
    }

    #[test]
    fn explicit_strategy_overrides_the_heuristic() {
        let router = ModelRouter::new();
        let decision = router
            .route_query("hello there", "enterprise", Some(RoutingStrategyName::CapabilityBased))
            .unwrap();
        assert_eq!(decision.strategy_used, RoutingStrategyName::CapabilityBased);
    }

    #[test]
    fn stats_accumulate_across_routed_requests() {
        let router = ModelRouter::new();
        router.route_query("hello", "basic", None).unwrap();
        router.route_query("fix this bug", "enterprise", None).unwrap();
        let stats = router.routing_stats();
        assert_eq!(stats.total_requests, 2);
    }

    #[test]
    fn enough_observations_switches_default_strategy_to_adaptive() {
        let router = ModelRouter::new();
        for _ in 0..=ADAPTIVE_HISTORY_THRESHOLD {
            router.update_observation("openai", "gpt-3.5-turbo", true, 500.0, 0.001);
        }
        let decision = router.route_query("hello", "basic", None).unwrap();
        assert_eq!(decision.strategy_used, RoutingStrategyName::Adaptive);
    }

    #[test]
    fn update_observation_nudges_profile_latency() {
        let router = ModelRouter::new();
        let before = router.profiles.read().unwrap().iter().find(|p| p.model == "gpt-4").unwrap().avg_latency_ms;
        router.update_observation("openai", "gpt-4", true, 100.0, 0.01);
        let after = router.profiles.read().unwrap().iter().find(|p| p.model == "gpt-4").unwrap().avg_latency_ms;
        assert!(after < before);
    }
}
