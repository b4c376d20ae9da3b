//! Top-level request/response envelopes and tenant context (design §3).
//!
//! These wrap the narrower [`gateway_provider`] completion types with the
//! fields the pipeline coordinator itself needs: tenant identity and tier,
//! a deadline, an idempotency key, and a stable fingerprint for the cache.

use gateway_provider::{CompletionResponse, Message};
use gateway_ratelimiter::Tier;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

/// Feature flags and quota context carried alongside a tenant's tier.
#[derive(Debug, Clone, Default)]
pub struct TenantFlags {
    pub hybrid_cache: bool,
    pub bypass_rate_limit: bool,
}

/// The caller's identity for one request. Looked up by the front door
/// (authentication is out of scope here) and handed to the coordinator
/// verbatim.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: String,
    pub tier: Tier,
    pub flags: TenantFlags,
}

impl Tenant {
    pub fn new(id: impl Into<String>, tier: Tier) -> Self {
        Self {
            id: id.into(),
            tier,
            flags: TenantFlags::default(),
        }
    }

    /// The tier label the model router's `tier_access` lists use. The
    /// router's default profile table was seeded with "basic" rather than
    /// "free" (see `gateway-router::profiles`); `Free` maps onto it here so
    /// tenant tiers stay a single enum instead of two parallel vocabularies.
    pub fn router_tier(&self) -> &'static str {
        match self.tier {
            Tier::Free => "basic",
            Tier::Starter => "basic",
            Tier::Professional => "professional",
            Tier::Enterprise => "enterprise",
        }
    }
}

/// An immutable request envelope for one pipeline traversal (design §3).
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub id: String,
    pub tenant: Tenant,
    pub messages: Vec<Message>,
    pub requested_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
    pub stream: bool,
    pub deadline: Instant,
    pub idempotency_key: Option<String>,
}

impl RequestEnvelope {
    pub fn new(id: impl Into<String>, tenant: Tenant, messages: Vec<Message>, deadline: Instant) -> Self {
        Self {
            id: id.into(),
            tenant,
            messages,
            requested_model: None,
            temperature: 0.7,
            max_tokens: Some(1000),
            stop: Vec::new(),
            stream: false,
            deadline,
            idempotency_key: None,
        }
    }

    /// Stable fingerprint over the canonicalized body: model hint, sampling
    /// parameters, and the message list in order. Two requests with the
    /// same fingerprint are the same cache entry.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.requested_model.hash(&mut hasher);
        self.temperature.to_bits().hash(&mut hasher);
        self.max_tokens.hash(&mut hasher);
        self.stop.hash(&mut hasher);
        for message in &self.messages {
            message.role.hash(&mut hasher);
            message.content.hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }

    /// The text the semantic cache embeds: the last user turn, if any.
    pub fn last_user_turn(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }

    /// Rough token estimate for admission/routing before the provider's own
    /// tokenizer is consulted (4 characters per token, the same heuristic
    /// `gateway-router::estimate_tokens` uses for the prompt).
    pub fn estimated_tokens(&self) -> u32 {
        let chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
        ((chars / 4).max(1)) as u32
    }
}

/// Outcome of one pipeline traversal (design §3). Cheap to clone: cloning a
/// served response is exactly what a cache hit does.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub request_id: String,
    pub content: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
    pub latency_ms: f64,
    pub cached: bool,
    pub finish_reason: Option<String>,
}

impl ResponseEnvelope {
    pub fn from_completion(request_id: impl Into<String>, response: &CompletionResponse, cached: bool) -> Self {
        Self {
            request_id: request_id.into(),
            content: response.content.clone(),
            provider: response.provider.clone(),
            model: response.model.clone(),
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            cost: if cached { 0.0 } else { response.usage.total_cost() },
            latency_ms: response.latency_ms,
            cached,
            finish_reason: response.finish_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> Tenant {
        Tenant::new("acme", Tier::Professional)
    }

    #[test]
    fn fingerprint_is_stable_for_identical_bodies() {
        let req_a = RequestEnvelope::new("r1", tenant(), vec![Message::new("user", "hi")], Instant::now());
        let req_b = RequestEnvelope::new("r2", tenant(), vec![Message::new("user", "hi")], Instant::now());
        assert_eq!(req_a.fingerprint(), req_b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_on_content_change() {
        let req_a = RequestEnvelope::new("r1", tenant(), vec![Message::new("user", "hi")], Instant::now());
        let req_b = RequestEnvelope::new("r1", tenant(), vec![Message::new("user", "bye")], Instant::now());
        assert_ne!(req_a.fingerprint(), req_b.fingerprint());
    }

    #[test]
    fn router_tier_maps_free_and_starter_onto_basic() {
        assert_eq!(Tenant::new("t", Tier::Free).router_tier(), "basic");
        assert_eq!(Tenant::new("t", Tier::Starter).router_tier(), "basic");
        assert_eq!(Tenant::new("t", Tier::Enterprise).router_tier(), "enterprise");
    }

    #[test]
    fn cached_response_reports_zero_cost() {
        let completion = CompletionResponse {
            content: "hi".into(),
            model: "gpt-4".into(),
            provider: "openai".into(),
            usage: gateway_provider::TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                prompt_cost: 0.01,
                completion_cost: 0.02,
            },
            latency_ms: 12.0,
            cached: true,
            finish_reason: Some("stop".into()),
        };
        let envelope = ResponseEnvelope::from_completion("r1", &completion, true);
        assert_eq!(envelope.cost, 0.0);
    }
}
