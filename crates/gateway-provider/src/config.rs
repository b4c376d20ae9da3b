//! Static per-backend configuration: credentials, limits, pricing.

/// Configuration for one backend adapter.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: std::time::Duration,
    pub max_concurrent_requests: u32,
    pub prompt_cost_per_1k: f64,
    pub completion_cost_per_1k: f64,
    pub supported_models: Vec<String>,
    pub default_model: String,
    pub max_context_length: u32,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        let default_model = "default".to_string();
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: None,
            timeout: std::time::Duration::from_secs(30),
            max_concurrent_requests: 10,
            prompt_cost_per_1k: 0.0015,
            completion_cost_per_1k: 0.002,
            supported_models: vec![default_model.clone()],
            default_model,
            max_context_length: 4000,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn supported_models(mut self, models: Vec<String>) -> Self {
        self.supported_models = models;
        self
    }

    pub fn pricing(mut self, prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        self.prompt_cost_per_1k = prompt_per_1k;
        self.completion_cost_per_1k = completion_per_1k;
        self
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.supported_models.iter().any(|m| m == model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_defaults_to_single_supported_model() {
        let config = ProviderConfig::new("openai", "key");
        assert!(config.supports_model("default"));
        assert!(!config.supports_model("gpt-4"));
    }

    #[test]
    fn supported_models_overrides_default_list() {
        let config =
            ProviderConfig::new("openai", "key").supported_models(vec!["gpt-4".into(), "gpt-3.5-turbo".into()]);
        assert!(config.supports_model("gpt-4"));
        assert!(!config.supports_model("default"));
    }
}
