//! The [`Provider`] trait backends implement, a registry of them keyed by
//! name, and the adapter that lets the fallback executor drive the registry
//! through `gateway_fallback::CompletionProvider`.

use crate::error::ProviderError;
use crate::metrics::ProviderMetrics;
use crate::types::{CompletionRequest, CompletionResponse, StreamChunk};
use futures::stream::BoxStream;
use gateway_fallback::{AttemptError, Instance};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Egress capability to one backend. Implemented once per backend family
/// (OpenAI, Anthropic, a self-hosted model server, ...).
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable name used to key the registry and to tag responses/errors.
    fn name(&self) -> &str;

    /// Whether this adapter serves the given model id.
    fn supports(&self, model: &str) -> bool;

    /// Estimates token count for `text` under `model`'s tokenizer. Adapters
    /// without a local tokenizer may approximate (e.g. chars / 4).
    async fn count_tokens(&self, text: &str, model: &str) -> u32;

    /// Non-streaming completion. Implementations should honor `deadline` by
    /// racing the backend call against it.
    async fn complete(
        &self,
        request: &CompletionRequest,
        deadline: Instant,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Streaming completion; the final chunk carries a `finish_reason`.
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        deadline: Instant,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError>;

    /// Lightweight liveness probe, independent of the load balancer's health
    /// score; used for the adapter's own readiness reporting.
    async fn health(&self) -> bool;
}

/// Backends keyed by name, as registered at configuration load.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(|s| s.as_str())
    }

    /// Probes every registered backend concurrently.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::with_capacity(self.providers.len());
        for (name, provider) in &self.providers {
            results.insert(name.clone(), provider.health().await);
        }
        results
    }
}

/// Bridges a [`ProviderRegistry`] into `gateway_fallback::CompletionProvider`,
/// so the fallback executor can drive real backends.
///
/// The executor only ever hands us a `&dyn Instance`; instance selection and
/// health tracking live entirely in the load balancer. This adapter's only
/// job is to route `instance.provider()` to the right [`Provider`] and
/// translate its result into the executor's retryable/fatal split.
pub struct CompletionAdapter {
    registry: Arc<ProviderRegistry>,
    metrics: Mutex<HashMap<String, Arc<ProviderMetrics>>>,
}

impl CompletionAdapter {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            metrics: Mutex::new(HashMap::new()),
        }
    }

    /// Metrics for one backend, grouped across all of its instances.
    pub fn metrics_for(&self, provider: &str) -> Arc<ProviderMetrics> {
        let mut metrics = self.metrics.lock().unwrap();
        metrics
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(ProviderMetrics::new()))
            .clone()
    }
}

#[async_trait::async_trait]
impl gateway_fallback::CompletionProvider<CompletionRequest, CompletionResponse> for CompletionAdapter {
    type Error = ProviderError;

    async fn complete(
        &self,
        instance: &dyn Instance,
        request: &CompletionRequest,
        deadline: Instant,
    ) -> Result<CompletionResponse, AttemptError<Self::Error>> {
        let Some(provider) = self.registry.get(instance.provider()) else {
            return Err(AttemptError::Fatal {
                error: ProviderError::ModelNotFound {
                    model: instance.model().to_string(),
                },
            });
        };

        let started = Instant::now();
        match provider.complete(request, deadline).await {
            Ok(mut response) => {
                response.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                response.provider = provider.name().to_string();
                self.metrics_for(instance.provider()).record_request(
                    true,
                    response.latency_ms,
                    response.usage.total_tokens() as u64,
                    response.usage.total_cost(),
                );
                Ok(response)
            }
            Err(error) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.metrics_for(instance.provider())
                    .record_request(false, latency_ms, 0, 0.0);
                if error.is_retryable() {
                    let reason = error.classify();
                    Err(AttemptError::Retryable { error, reason })
                } else {
                    Err(AttemptError::Fatal { error })
                }
            }
        }
    }
}
