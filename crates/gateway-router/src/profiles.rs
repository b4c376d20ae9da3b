//! Default profile table for the 7 representative models operators start
//! from. Meant as a seed configuration, not a hardcoded catalog: real
//! deployments override this via configuration load.

use crate::types::ModelCapability::{
    Code, FunctionCalling, JsonMode, LongContext, Streaming, TextGeneration, Vision,
};
use crate::types::ModelProfile;

fn tier(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// The router's built-in seed catalog, grounded in realistic cost/latency/
/// quality figures for each model family.
pub fn default_model_profiles() -> Vec<ModelProfile> {
    vec![
        ModelProfile {
            provider: "openai".into(),
            model: "gpt-3.5-turbo".into(),
            capabilities: vec![TextGeneration, FunctionCalling, JsonMode, Streaming],
            max_tokens: 4096,
            cost_per_1k_input: 0.0005,
            cost_per_1k_output: 0.0015,
            avg_latency_ms: 800.0,
            quality_score: 0.7,
            context_window: 16385,
            tier_access: tier(&["basic", "professional", "enterprise"]),
        },
        ModelProfile {
            provider: "openai".into(),
            model: "gpt-4".into(),
            capabilities: vec![TextGeneration, Code, FunctionCalling, JsonMode, Streaming],
            max_tokens: 8192,
            cost_per_1k_input: 0.03,
            cost_per_1k_output: 0.06,
            avg_latency_ms: 2000.0,
            quality_score: 0.9,
            context_window: 8192,
            tier_access: tier(&["professional", "enterprise"]),
        },
        ModelProfile {
            provider: "openai".into(),
            model: "gpt-4-turbo".into(),
            capabilities: vec![
                TextGeneration,
                Code,
                FunctionCalling,
                Vision,
                JsonMode,
                Streaming,
                LongContext,
            ],
            max_tokens: 4096,
            cost_per_1k_input: 0.01,
            cost_per_1k_output: 0.03,
            avg_latency_ms: 1500.0,
            quality_score: 0.95,
            context_window: 128_000,
            tier_access: tier(&["enterprise"]),
        },
        ModelProfile {
            provider: "anthropic".into(),
            model: "claude-3-sonnet".into(),
            capabilities: vec![TextGeneration, Code, Streaming, LongContext],
            max_tokens: 4096,
            cost_per_1k_input: 0.003,
            cost_per_1k_output: 0.015,
            avg_latency_ms: 1200.0,
            quality_score: 0.85,
            context_window: 200_000,
            tier_access: tier(&["professional", "enterprise"]),
        },
        ModelProfile {
            provider: "anthropic".into(),
            model: "claude-3-opus".into(),
            capabilities: vec![TextGeneration, Code, Streaming, LongContext, Vision],
            max_tokens: 4096,
            cost_per_1k_input: 0.015,
            cost_per_1k_output: 0.075,
            avg_latency_ms: 2500.0,
            quality_score: 0.98,
            context_window: 200_000,
            tier_access: tier(&["enterprise"]),
        },
        ModelProfile {
            provider: "llama".into(),
            model: "llama-3-8b".into(),
            capabilities: vec![TextGeneration, Streaming],
            max_tokens: 2048,
            cost_per_1k_input: 0.0001,
            cost_per_1k_output: 0.0002,
            avg_latency_ms: 400.0,
            quality_score: 0.65,
            context_window: 8192,
            tier_access: tier(&["basic", "professional", "enterprise"]),
        },
        ModelProfile {
            provider: "llama".into(),
            model: "llama-3-70b".into(),
            capabilities: vec![TextGeneration, Code, Streaming],
            max_tokens: 4096,
            cost_per_1k_input: 0.0005,
            cost_per_1k_output: 0.001,
            avg_latency_ms: 1000.0,
            quality_score: 0.8,
            context_window: 8192,
            tier_access: tier(&["professional", "enterprise"]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ships_seven_models() {
        assert_eq!(default_model_profiles().len(), 7);
    }

    #[test]
    fn basic_tier_only_sees_cheap_models() {
        let basic_accessible = default_model_profiles()
            .into_iter()
            .filter(|m| m.accessible_by("basic"))
            .count();
        assert_eq!(basic_accessible, 2);
    }
}
