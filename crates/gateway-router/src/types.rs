//! Shapes exchanged between the router and its caller: capability and task
//! vocabularies, the static model profile, and the routing context/decision
//! pair.

use std::collections::HashMap;

/// A capability a model may advertise and a request may demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelCapability {
    TextGeneration,
    Code,
    FunctionCalling,
    Vision,
    LongContext,
    Streaming,
    JsonMode,
}

/// Coarse classification of what the caller is asking for, used to bias
/// strategy selection and the required-capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Chat,
    CodeGeneration,
    CodeReview,
    CreativeWriting,
    Analysis,
    Translation,
    Summarization,
    QuestionAnswering,
    Reasoning,
    Vision,
}

/// Static description of one backend model: what it can do, what it costs,
/// and which tenant tiers may use it. Latency and quality are updated in
/// place as observations come in.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub provider: String,
    pub model: String,
    pub capabilities: Vec<ModelCapability>,
    pub max_tokens: u32,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub avg_latency_ms: f64,
    pub quality_score: f64,
    pub context_window: u32,
    pub tier_access: Vec<String>,
}

impl ModelProfile {
    pub fn has_capability(&self, cap: ModelCapability) -> bool {
        self.capabilities.contains(&cap)
    }

    pub fn accessible_by(&self, tier: &str) -> bool {
        self.tier_access.iter().any(|t| t == tier)
    }

    pub fn estimated_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1000.0) * self.cost_per_1k_input
            + (output_tokens as f64 / 1000.0) * self.cost_per_1k_output
    }
}

/// What the caller is asking the router to decide on.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    pub query: String,
    pub task_type: Option<TaskType>,
    pub token_count: u32,
    pub tenant_id: Option<String>,
    pub tenant_tier: String,
    pub required_capabilities: Vec<ModelCapability>,
    pub max_cost: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub preferred_models: Vec<String>,
    pub excluded_models: Vec<String>,
    pub max_tokens: u32,
    pub metadata: HashMap<String, String>,
}

impl RoutingContext {
    pub fn new(query: impl Into<String>, tenant_tier: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            task_type: None,
            token_count: 0,
            tenant_id: None,
            tenant_tier: tenant_tier.into(),
            required_capabilities: vec![ModelCapability::TextGeneration],
            max_cost: None,
            max_latency_ms: None,
            preferred_models: Vec::new(),
            excluded_models: Vec::new(),
            max_tokens: 1000,
            metadata: HashMap::new(),
        }
    }
}

/// Which strategy produced a decision, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategyName {
    CostOptimized,
    PerformanceOptimized,
    CapabilityBased,
    Adaptive,
}

impl RoutingStrategyName {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingStrategyName::CostOptimized => "cost_optimized",
            RoutingStrategyName::PerformanceOptimized => "performance_optimized",
            RoutingStrategyName::CapabilityBased => "capability_based",
            RoutingStrategyName::Adaptive => "adaptive",
        }
    }
}

/// The router's output: a ranked chain plus the reasoning behind it.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub primary_provider: String,
    pub primary_model: String,
    pub fallback_models: Vec<(String, String)>,
    pub strategy_used: RoutingStrategyName,
    pub score: f64,
    pub estimated_cost: f64,
    pub estimated_latency_ms: f64,
    pub reasoning: String,
}
