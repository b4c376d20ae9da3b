//! Request/response shapes exchanged with a backend.

use std::collections::HashMap;

/// One turn in a chat-style completion request.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub metadata: Option<HashMap<String, String>>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            metadata: None,
        }
    }
}

/// A completion request, independent of which backend will serve it.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop: Vec<String>,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

impl CompletionRequest {
    pub fn new(tenant_id: impl Into<String>, model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature: 0.7,
            max_tokens: Some(1000),
            stream: false,
            top_p: Some(1.0),
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
            stop: Vec::new(),
            tenant_id: tenant_id.into(),
            user_id: None,
            metadata: None,
        }
    }
}

/// Token accounting for one completion, with cost derived from the owning
/// provider's per-1k pricing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub prompt_cost: f64,
    pub completion_cost: f64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn total_cost(&self) -> f64 {
        self.prompt_cost + self.completion_cost
    }
}

/// Full (non-streaming) response from a backend.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub usage: TokenUsage,
    pub latency_ms: f64,
    pub cached: bool,
    pub finish_reason: Option<String>,
}

impl gateway_loadbalancer::RequestKey for CompletionRequest {
    /// Sticky key for consistent-hash selection: the user if known, else the
    /// tenant, so repeat turns in the same conversation tend to land on the
    /// same instance without requiring a dedicated session header.
    fn request_key(&self) -> Option<&str> {
        Some(self.user_id.as_deref().unwrap_or(&self.tenant_id))
    }
}

/// One chunk of a streamed response.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub delta: String,
    pub chunk_index: u32,
    pub finish_reason: Option<String>,
}
