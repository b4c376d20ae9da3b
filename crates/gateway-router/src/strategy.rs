//! The four routing strategies, each turning a context plus the candidate
//! profiles into a ranked chain. All four are pure functions over their
//! inputs except [`adaptive`], which additionally reads (never writes) the
//! [`AdaptiveHistory`] the router maintains across calls.

use crate::error::RouterError;
use crate::types::{ModelProfile, RoutingContext, RoutingDecision, RoutingStrategyName};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

fn is_excluded(model: &ModelProfile, context: &RoutingContext) -> bool {
    context.excluded_models.iter().any(|m| m == &model.model)
}

fn estimated_cost(model: &ModelProfile, context: &RoutingContext) -> f64 {
    model.estimated_cost(context.token_count, context.max_tokens)
}

fn top_fallbacks(ranked: &[&ModelProfile]) -> Vec<(String, String)> {
    ranked
        .iter()
        .skip(1)
        .take(2)
        .map(|m| (m.provider.clone(), m.model.clone()))
        .collect()
}

/// Picks the error for an empty eligible set: `ContextWindowExceeded` only
/// when every other constraint had survivors and the window filter alone
/// emptied it, `NoEligibleModels` otherwise.
fn eligibility_error(before_window: &[&ModelProfile]) -> RouterError {
    if before_window.is_empty() {
        RouterError::NoEligibleModels
    } else {
        RouterError::ContextWindowExceeded
    }
}

/// Cheapest model meeting tier, capability, context-window, exclusion and
/// max-cost constraints; next two cheapest become fallbacks.
pub fn cost_optimized(context: &RoutingContext, profiles: &[ModelProfile]) -> Result<RoutingDecision, RouterError> {
    let before_window: Vec<&ModelProfile> = profiles
        .iter()
        .filter(|m| m.accessible_by(&context.tenant_tier))
        .filter(|m| context.required_capabilities.iter().all(|c| m.has_capability(*c)))
        .filter(|m| !is_excluded(m, context))
        .filter(|m| match context.max_cost {
            Some(max) => estimated_cost(m, context) <= max,
            None => true,
        })
        .collect();

    let mut eligible: Vec<&ModelProfile> = before_window
        .iter()
        .copied()
        .filter(|m| context.token_count <= m.context_window)
        .collect();

    if eligible.is_empty() {
        return Err(eligibility_error(&before_window));
    }

    eligible.sort_by(|a, b| estimated_cost(a, context).total_cmp(&estimated_cost(b, context)));
    let selected = eligible[0];
    let cost = estimated_cost(selected, context);

    Ok(RoutingDecision {
        primary_provider: selected.provider.clone(),
        primary_model: selected.model.clone(),
        fallback_models: top_fallbacks(&eligible),
        strategy_used: RoutingStrategyName::CostOptimized,
        score: 1.0 / (1.0 + cost),
        estimated_cost: cost,
        estimated_latency_ms: selected.avg_latency_ms,
        reasoning: format!("selected {} as most cost-effective at ${:.4}", selected.model, cost),
    })
}

fn task_boost(task: crate::types::TaskType, model: &str) -> f64 {
    use crate::types::TaskType::*;
    match (task, model) {
        (CodeGeneration, "gpt-4") => 0.2,
        (CodeGeneration, "claude-3-opus") => 0.25,
        (CreativeWriting, "gpt-4") => 0.15,
        (CreativeWriting, "claude-3-opus") => 0.2,
        (Reasoning, "gpt-4") => 0.2,
        (Reasoning, "claude-3-opus") => 0.15,
        (Vision, "gpt-4-vision") => 0.3,
        _ => 0.0,
    }
}

fn performance_score(model: &ModelProfile, context: &RoutingContext) -> f64 {
    let mut score = model.quality_score;
    if let Some(task) = context.task_type {
        score += task_boost(task, &model.model);
    }
    let latency_penalty = (model.avg_latency_ms / 10_000.0).min(0.2);
    score -= latency_penalty;
    score.clamp(0.0, 1.0)
}

/// Highest quality-plus-task-bonus model within latency/tier/window
/// constraints; the most expensive model this strategy picks is a deliberate
/// tradeoff, not an oversight.
pub fn performance_optimized(
    context: &RoutingContext,
    profiles: &[ModelProfile],
) -> Result<RoutingDecision, RouterError> {
    let before_window: Vec<&ModelProfile> = profiles
        .iter()
        .filter(|m| m.accessible_by(&context.tenant_tier))
        .filter(|m| !is_excluded(m, context))
        .filter(|m| match context.max_latency_ms {
            Some(max) => m.avg_latency_ms <= max,
            None => true,
        })
        .collect();

    let mut eligible: Vec<&ModelProfile> = before_window
        .iter()
        .copied()
        .filter(|m| context.token_count <= m.context_window)
        .collect();

    if eligible.is_empty() {
        return Err(eligibility_error(&before_window));
    }

    eligible.sort_by(|a, b| performance_score(b, context).total_cmp(&performance_score(a, context)));
    let selected = eligible[0];
    let score = performance_score(selected, context);

    Ok(RoutingDecision {
        primary_provider: selected.provider.clone(),
        primary_model: selected.model.clone(),
        fallback_models: top_fallbacks(&eligible),
        strategy_used: RoutingStrategyName::PerformanceOptimized,
        score,
        estimated_cost: estimated_cost(selected, context),
        estimated_latency_ms: selected.avg_latency_ms,
        reasoning: format!("selected {} for highest quality with score {:.2}", selected.model, score),
    })
}

fn capability_score(model: &ModelProfile, context: &RoutingContext) -> f64 {
    use crate::types::ModelCapability;
    use crate::types::TaskType;

    let mut score = model.quality_score * 0.5;

    let overlap = context
        .required_capabilities
        .iter()
        .filter(|c| model.has_capability(**c))
        .count();
    score += overlap as f64 * 0.1;

    if (context.token_count as f64) < model.context_window as f64 * 0.5 {
        score += 0.1;
    }

    let task_capability = context.task_type.and_then(|t| match t {
        TaskType::CodeGeneration => Some(ModelCapability::Code),
        TaskType::Vision => Some(ModelCapability::Vision),
        TaskType::QuestionAnswering => Some(ModelCapability::LongContext),
        _ => None,
    });
    if let Some(cap) = task_capability {
        if model.has_capability(cap) {
            score += 0.2;
        }
    }

    score.min(1.0)
}

/// Requires every demanded capability present; ranks survivors by quality
/// plus capability-overlap and task-fit bonuses.
pub fn capability_based(context: &RoutingContext, profiles: &[ModelProfile]) -> Result<RoutingDecision, RouterError> {
    let mut eligible: Vec<&ModelProfile> = profiles
        .iter()
        .filter(|m| context.required_capabilities.iter().all(|c| m.has_capability(*c)))
        .filter(|m| m.accessible_by(&context.tenant_tier))
        .collect();

    if eligible.is_empty() {
        return Err(RouterError::NoEligibleModels);
    }

    eligible.sort_by(|a, b| capability_score(b, context).total_cmp(&capability_score(a, context)));
    let selected = eligible[0];
    let score = capability_score(selected, context);

    Ok(RoutingDecision {
        primary_provider: selected.provider.clone(),
        primary_model: selected.model.clone(),
        fallback_models: top_fallbacks(&eligible),
        strategy_used: RoutingStrategyName::CapabilityBased,
        score,
        estimated_cost: estimated_cost(selected, context),
        estimated_latency_ms: selected.avg_latency_ms,
        reasoning: format!("selected {} for best capability match", selected.model),
    })
}

#[derive(Debug, Clone)]
struct AdaptiveEntry {
    success_count: u64,
    total_count: u64,
    avg_latency_ms: f64,
    last_used: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
struct CostEntry {
    total_cost: f64,
    request_count: u64,
}

/// Per-`(provider, model)` history the adaptive strategy scores against:
/// a rolling success rate/latency EMA and an average observed cost, both
/// fed by [`AdaptiveHistory::record`] after each real request completes.
#[derive(Default)]
pub struct AdaptiveHistory {
    performance: Mutex<HashMap<(String, String), AdaptiveEntry>>,
    cost: Mutex<HashMap<(String, String), CostEntry>>,
}

impl AdaptiveHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one completed request against `(provider, model)`.
    pub fn record(&self, provider: &str, model: &str, success: bool, latency_ms: f64, cost: f64) {
        let key = (provider.to_string(), model.to_string());
        {
            let mut performance = self.performance.lock().unwrap();
            let entry = performance.entry(key.clone()).or_insert(AdaptiveEntry {
                success_count: 0,
                total_count: 0,
                avg_latency_ms: 0.0,
                last_used: None,
            });
            entry.total_count += 1;
            if success {
                entry.success_count += 1;
            }
            const ALPHA: f64 = 0.1;
            entry.avg_latency_ms = (1.0 - ALPHA) * entry.avg_latency_ms + ALPHA * latency_ms;
            entry.last_used = Some(Instant::now());
        }
        {
            let mut costs = self.cost.lock().unwrap();
            let entry = costs.entry(key).or_default();
            entry.total_cost += cost;
            entry.request_count += 1;
        }
    }

    fn score(&self, model: &ModelProfile, context: &RoutingContext) -> f64 {
        let key = (model.provider.clone(), model.model.clone());

        let performance = self.performance.lock().unwrap();
        let (performance_score, recency_factor) = match performance.get(&key) {
            Some(entry) if entry.total_count > 0 => {
                let success_rate = entry.success_count as f64 / entry.total_count as f64;
                let recency = entry.last_used.map(|last| {
                    let age_hours = last.elapsed().as_secs_f64() / 3600.0;
                    1.0 / (1.0 + age_hours / 24.0)
                });
                (success_rate, recency)
            }
            _ => (model.quality_score, None),
        };
        drop(performance);

        let costs = self.cost.lock().unwrap();
        let cost_efficiency = match costs.get(&key) {
            Some(entry) if entry.request_count > 0 => 1.0 / (1.0 + entry.total_cost / entry.request_count as f64),
            _ => 1.0 / (1.0 + estimated_cost(model, context)),
        };
        drop(costs);

        let mut score = performance_score * 0.6 + cost_efficiency * 0.4;
        if let Some(recency_factor) = recency_factor {
            score *= 0.8 + 0.2 * recency_factor;
        }
        score
    }

    fn estimated_latency(&self, model: &ModelProfile) -> f64 {
        let key = (model.provider.clone(), model.model.clone());
        self.performance
            .lock()
            .unwrap()
            .get(&key)
            .filter(|e| e.total_count > 0)
            .map(|e| e.avg_latency_ms)
            .unwrap_or(model.avg_latency_ms)
    }
}

/// Blends historical success rate and cost efficiency, with a recency decay
/// favoring recently-used models, falling back to the static profile's
/// quality/cost for models with no history yet.
pub fn adaptive(
    context: &RoutingContext,
    profiles: &[ModelProfile],
    history: &AdaptiveHistory,
) -> Result<RoutingDecision, RouterError> {
    let before_window: Vec<&ModelProfile> = profiles
        .iter()
        .filter(|m| m.accessible_by(&context.tenant_tier))
        .filter(|m| !is_excluded(m, context))
        .collect();

    let mut eligible: Vec<&ModelProfile> = before_window
        .iter()
        .copied()
        .filter(|m| context.token_count <= m.context_window)
        .collect();

    if eligible.is_empty() {
        return Err(eligibility_error(&before_window));
    }

    eligible.sort_by(|a, b| history.score(b, context).total_cmp(&history.score(a, context)));
    let selected = eligible[0];
    let score = history.score(selected, context);

    Ok(RoutingDecision {
        primary_provider: selected.provider.clone(),
        primary_model: selected.model.clone(),
        fallback_models: top_fallbacks(&eligible),
        strategy_used: RoutingStrategyName::Adaptive,
        score,
        estimated_cost: estimated_cost(selected, context),
        estimated_latency_ms: history.estimated_latency(selected),
        reasoning: format!("selected {} based on historical performance", selected.model),
    })
}

/// How long of no activity before the adaptive recency bonus is considered
/// fully decayed; purely documentation, the decay itself is continuous.
pub const ADAPTIVE_RECENCY_HALF_LIFE: Duration = Duration::from_secs(24 * 3600);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::default_model_profiles;

    fn context(tier: &str) -> RoutingContext {
        let mut ctx = RoutingContext::new("hello", tier);
        ctx.token_count = 50;
        ctx
    }

    #[test]
    fn cost_optimized_picks_cheapest_eligible_model() {
        let decision = cost_optimized(&context("enterprise"), &default_model_profiles()).unwrap();
        assert_eq!(decision.primary_model, "llama-3-8b");
    }

    #[test]
    fn cost_optimized_respects_tier_restriction() {
        let decision = cost_optimized(&context("basic"), &default_model_profiles()).unwrap();
        assert!(["gpt-3.5-turbo", "llama-3-8b"].contains(&decision.primary_model.as_str()));
    }

    #[test]
    fn performance_optimized_penalizes_high_latency() {
        // claude-3-opus has the highest raw quality score (0.98) but its
        // latency penalty is capped at 0.2, while gpt-4-turbo's quality
        // (0.95) loses only 0.15 to latency, giving it the higher net score.
        let decision = performance_optimized(&context("enterprise"), &default_model_profiles()).unwrap();
        assert_eq!(decision.primary_model, "gpt-4-turbo");
    }

    #[test]
    fn capability_based_requires_all_capabilities() {
        let mut ctx = context("enterprise");
        ctx.required_capabilities = vec![
            crate::types::ModelCapability::TextGeneration,
            crate::types::ModelCapability::Vision,
        ];
        let decision = capability_based(&ctx, &default_model_profiles()).unwrap();
        assert!(["gpt-4-turbo", "claude-3-opus"].contains(&decision.primary_model.as_str()));
    }

    #[test]
    fn no_eligible_models_is_an_error() {
        let mut ctx = context("basic");
        ctx.required_capabilities = vec![crate::types::ModelCapability::Vision];
        assert_eq!(
            capability_based(&ctx, &default_model_profiles()).unwrap_err(),
            RouterError::NoEligibleModels
        );
    }

    #[test]
    fn context_window_exceeded_is_distinguished_from_no_eligible_models() {
        let mut ctx = context("enterprise");
        ctx.token_count = 10_000_000;
        assert_eq!(
            cost_optimized(&ctx, &default_model_profiles()).unwrap_err(),
            RouterError::ContextWindowExceeded
        );
        assert_eq!(
            performance_optimized(&ctx, &default_model_profiles()).unwrap_err(),
            RouterError::ContextWindowExceeded
        );

        let history = AdaptiveHistory::new();
        assert_eq!(
            adaptive(&ctx, &default_model_profiles(), &history).unwrap_err(),
            RouterError::ContextWindowExceeded
        );
    }

    #[test]
    fn adaptive_falls_back_to_profile_quality_without_history() {
        let history = AdaptiveHistory::new();
        let decision = adaptive(&context("enterprise"), &default_model_profiles(), &history).unwrap();
        assert_eq!(decision.strategy_used, RoutingStrategyName::Adaptive);
    }

    #[test]
    fn adaptive_rewards_recorded_success_over_quality_alone() {
        let history = AdaptiveHistory::new();
        for _ in 0..20 {
            history.record("llama", "llama-3-8b", true, 300.0, 0.0005);
        }
        let decision = adaptive(&context("enterprise"), &default_model_profiles(), &history).unwrap();
        assert_eq!(decision.primary_model, "llama-3-8b");
    }
}
