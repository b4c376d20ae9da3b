//! The pipeline coordinator: wires rate limiting, idempotency, the response
//! cache, the router and the fallback executor into the single request path
//! every completion travels (design §4.1).
//!
//! Every layer below this module is reusable on its own; this is the one
//! place that composes them for the gateway's specific shape of request.

use crate::config::{CacheMode as CacheModeConfig, ExecutorConfig, GatewayConfig};
use crate::idempotency::IdempotencyStore;
use crate::types::{RequestEnvelope, ResponseEnvelope};
use gateway_bulkhead::BulkheadRegistry;
use gateway_cache::{
    CacheMode, EmbeddingProvider, LeaderOutcome, NoopEmbeddingProvider, ResponseCache,
    ResponseCacheConfig,
};
use gateway_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use gateway_core::error::{GatewayError, ReasonClass};
use gateway_core::events::EventListeners;
use gateway_fallback::{
    AttemptError, ChainEntry, CompletionProvider as FallbackCompletionProvider, FallbackChain,
    FallbackExecutor, FallbackExecutorConfig, Instance,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use gateway_loadbalancer::{LoadBalancerRegistry, RequestKey};
use gateway_provider::{
    CompletionAdapter, CompletionRequest, CompletionResponse, ProviderError, ProviderRegistry,
    StreamChunk,
};
use gateway_ratelimiter::{ResourceFamily, TenantRateLimiterRegistry, TierDefaults};
use gateway_retry::{RetryBudget, RetryBudgetBuilder};
use gateway_router::{ModelRouter, RoutingDecision, RouterError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wraps a [`FallbackCompletionProvider`] impl, acquiring a per-instance
/// bulkhead permit before every attempt (design §5: backend client handles
/// are pooled per provider, and the pool's capacity bounds concurrency).
struct BulkheadedProvider<P> {
    inner: P,
    bulkhead: Arc<BulkheadRegistry>,
}

#[async_trait::async_trait]
impl<P> FallbackCompletionProvider<CompletionRequest, CompletionResponse> for BulkheadedProvider<P>
where
    P: FallbackCompletionProvider<CompletionRequest, CompletionResponse, Error = ProviderError>
        + Send
        + Sync,
{
    type Error = ProviderError;

    async fn complete(
        &self,
        instance: &dyn Instance,
        request: &CompletionRequest,
        deadline: Instant,
    ) -> Result<CompletionResponse, AttemptError<Self::Error>> {
        let permit = self
            .bulkhead
            .acquire(instance.instance_id())
            .await
            .map_err(|_| AttemptError::Retryable {
                error: ProviderError::Timeout,
                reason: ReasonClass::Timeout,
            })?;
        let result = self.inner.complete(instance, request, deadline).await;
        drop(permit);
        result
    }
}

type GatewayExecutor = FallbackExecutor<
    CompletionRequest,
    CompletionResponse,
    BulkheadedProvider<CompletionAdapter>,
    LoadBalancerRegistry,
>;

/// Owns every pattern registry the request path touches and drives one
/// request through all of them in order.
pub struct PipelineCoordinator {
    router: Arc<ModelRouter>,
    rate_limiter: Arc<TenantRateLimiterRegistry>,
    cache: Option<Arc<ResponseCache<CompletionResponse>>>,
    idempotency: Arc<IdempotencyStore>,
    load_balancer: Arc<LoadBalancerRegistry>,
    circuit_breaker: Arc<CircuitBreakerRegistry>,
    bulkhead: Arc<BulkheadRegistry>,
    providers: Arc<ProviderRegistry>,
    executor: Arc<GatewayExecutor>,
    executor_settings: ExecutorConfig,
}

impl PipelineCoordinator {
    pub fn new(config: GatewayConfig, providers: Arc<ProviderRegistry>) -> Self {
        let router = Arc::new(ModelRouter::new());

        let mut tiers = TierDefaults::standard();
        for (tier, limits) in &config.rate_limiter.tier_overrides {
            tiers.set_tier((*tier).into(), (*limits).into());
        }
        let rate_limiter = Arc::new(TenantRateLimiterRegistry::new(
            config.rate_limiter.algorithm.into(),
            tiers,
        ));

        let cache = (config.cache.mode != CacheModeConfig::Off).then(|| {
            let mode = match config.cache.mode {
                CacheModeConfig::Off => unreachable!("filtered out above"),
                CacheModeConfig::Exact => CacheMode::Exact,
                CacheModeConfig::Semantic => CacheMode::Semantic,
                CacheModeConfig::Hybrid => CacheMode::Hybrid,
            };
            let cache_config = ResponseCacheConfig::builder()
                .max_size(config.cache.max_entries)
                .ttl(Duration::from_secs(config.cache.ttl_s))
                .mode(mode)
                .similarity_threshold(config.cache.similarity_threshold)
                .build();
            let embedder: Arc<dyn EmbeddingProvider> = Arc::new(NoopEmbeddingProvider);
            Arc::new(ResponseCache::new(cache_config, embedder))
        });

        let idempotency = Arc::new(IdempotencyStore::new(Duration::from_secs(
            config.cache.ttl_s.max(60),
        )));

        let load_balancer = Arc::new(LoadBalancerRegistry::new(config.load_balancer.strategy.into()));

        let window = config.breaker.failure_threshold.max(1);
        let breaker_config = CircuitBreakerConfig::<(), ()>::builder()
            .failure_rate_threshold(0.9)
            .sliding_window_size(window)
            .minimum_number_of_calls(window)
            .wait_duration_in_open(Duration::from_secs(config.breaker.recovery_timeout_s))
            .name("gateway")
            .build_config();
        let circuit_breaker = Arc::new(CircuitBreakerRegistry::new(breaker_config));

        let bulkhead = Arc::new(BulkheadRegistry::new(Some(
            config.executor.per_attempt_deadline(),
        )));

        let adapter = CompletionAdapter::new(Arc::clone(&providers));
        let bulkheaded = BulkheadedProvider {
            inner: adapter,
            bulkhead: Arc::clone(&bulkhead),
        };

        let retry_budget: Arc<dyn RetryBudget> = RetryBudgetBuilder::new()
            .token_bucket()
            .max_tokens(200)
            .build();

        let executor_config = Arc::new(FallbackExecutorConfig {
            circuit_breaker: Arc::clone(&circuit_breaker),
            retry_budget,
            event_listeners: EventListeners::new(),
            name: "gateway".to_string(),
        });

        let executor = Arc::new(FallbackExecutor::new(
            Arc::new(bulkheaded),
            Arc::clone(&load_balancer),
            executor_config,
        ));

        Self {
            router,
            rate_limiter,
            cache,
            idempotency,
            load_balancer,
            circuit_breaker,
            bulkhead,
            providers,
            executor,
            executor_settings: config.executor,
        }
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancerRegistry> {
        &self.load_balancer
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.circuit_breaker
    }

    pub fn bulkhead(&self) -> &Arc<BulkheadRegistry> {
        &self.bulkhead
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    /// Runs one request through admission, idempotency replay, the cache,
    /// routing and the fallback executor, in that order.
    pub async fn handle(
        &self,
        request: RequestEnvelope,
    ) -> Result<ResponseEnvelope, GatewayError<ProviderError>> {
        let tier = request.tenant.tier;
        let bypass = request.tenant.flags.bypass_rate_limit;

        self.rate_limiter
            .allow(&request.tenant.id, tier, ResourceFamily::ApiCalls, 1, bypass)
            .map_err(|retry_after| GatewayError::RateLimited {
                retry_after: Some(retry_after),
            })?;
        self.rate_limiter
            .allow(
                &request.tenant.id,
                tier,
                ResourceFamily::Tokens,
                request.estimated_tokens() as u64,
                bypass,
            )
            .map_err(|retry_after| GatewayError::RateLimited {
                retry_after: Some(retry_after),
            })?;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(cached) = self.idempotency.get(&request.tenant.id, key) {
                return Ok(cached);
            }
        }

        let fingerprint = request.fingerprint();
        let query_text = request.last_user_turn();

        if let Some(cache) = &self.cache {
            if let Some(completion) = cache.get(&fingerprint, query_text) {
                let envelope = ResponseEnvelope::from_completion(request.id.clone(), &completion, true);
                self.remember_idempotent(&request, &envelope);
                return Ok(envelope);
            }
        }

        let decision = self
            .router
            .route_query(
                query_text.unwrap_or_default(),
                request.tenant.router_tier(),
                None,
            )
            .map_err(|err| match err {
                RouterError::NoEligibleModels => GatewayError::Unauthorized {
                    reason: err.to_string(),
                },
                RouterError::ContextWindowExceeded => GatewayError::BadRequest {
                    reason: err.to_string(),
                },
            })?;

        let chain = self.build_chain(&decision);
        let completion_request = self.to_completion_request(&request, &decision);

        let response = if let Some(cache) = &self.cache {
            match cache.try_lead(&fingerprint) {
                None => {
                    let outcome = self
                        .executor
                        .execute(&chain, &completion_request, request.deadline)
                        .await;
                    match &outcome {
                        Ok(response) => {
                            cache.finish_lead(&fingerprint, LeaderOutcome::Stored(response.clone()))
                        }
                        Err(_) => cache.finish_lead(&fingerprint, LeaderOutcome::Failed),
                    }
                    outcome.map_err(GatewayError::from)?
                }
                Some(mut waiter) => {
                    let remaining = request.deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, waiter.recv()).await {
                        Ok(Ok(LeaderOutcome::Stored(response))) => response,
                        _ => self
                            .executor
                            .execute(&chain, &completion_request, request.deadline)
                            .await
                            .map_err(GatewayError::from)?,
                    }
                }
            }
        } else {
            self.executor
                .execute(&chain, &completion_request, request.deadline)
                .await
                .map_err(GatewayError::from)?
        };

        self.router.update_observation(
            &response.provider,
            &response.model,
            true,
            response.latency_ms,
            response.usage.total_cost(),
        );

        if let Some(cache) = &self.cache {
            cache.insert(&fingerprint, query_text, response.clone());
        }

        let envelope = ResponseEnvelope::from_completion(request.id.clone(), &response, false);
        self.remember_idempotent(&request, &envelope);
        Ok(envelope)
    }

    /// Streaming counterpart of [`handle`](Self::handle). Bypasses the
    /// response cache and the fallback executor entirely: once a chunk has
    /// reached the caller, switching providers would mean showing them a
    /// second, unrelated partial answer, so a chain entry is only abandoned
    /// before its *first* chunk arrives. After that, a mid-stream failure
    /// surfaces as an error item on the stream rather than a silent retry.
    pub async fn handle_stream(
        &self,
        request: RequestEnvelope,
    ) -> Result<BoxStream<'static, Result<StreamChunk, GatewayError<ProviderError>>>, GatewayError<ProviderError>> {
        let tier = request.tenant.tier;
        let bypass = request.tenant.flags.bypass_rate_limit;

        self.rate_limiter
            .allow(&request.tenant.id, tier, ResourceFamily::ApiCalls, 1, bypass)
            .map_err(|retry_after| GatewayError::RateLimited {
                retry_after: Some(retry_after),
            })?;
        self.rate_limiter
            .allow(
                &request.tenant.id,
                tier,
                ResourceFamily::Tokens,
                request.estimated_tokens() as u64,
                bypass,
            )
            .map_err(|retry_after| GatewayError::RateLimited {
                retry_after: Some(retry_after),
            })?;

        let decision = self
            .router
            .route_query(
                request.last_user_turn().unwrap_or_default(),
                request.tenant.router_tier(),
                None,
            )
            .map_err(|err| match err {
                RouterError::NoEligibleModels => GatewayError::Unauthorized {
                    reason: err.to_string(),
                },
                RouterError::ContextWindowExceeded => GatewayError::BadRequest {
                    reason: err.to_string(),
                },
            })?;

        let mut entries = vec![(decision.primary_provider.clone(), decision.primary_model.clone())];
        entries.extend(decision.fallback_models.iter().cloned());
        let attempts = entries.len();

        let mut completion_request = self.to_completion_request(&request, &decision);
        completion_request.stream = true;

        for (provider_name, model) in &entries {
            let Some(instance) = self
                .load_balancer
                .select_instance(provider_name, model, completion_request.request_key())
            else {
                continue;
            };
            let Some(provider) = self.providers.get(provider_name) else {
                continue;
            };
            let permit = match self.bulkhead.acquire(instance.instance_id()).await {
                Ok(permit) => permit,
                Err(_) => continue,
            };

            match provider.complete_stream(&completion_request, request.deadline).await {
                Ok(mut inner) => {
                    self.load_balancer.mark_start(instance.instance_id());
                    let (tx, rx) = tokio::sync::mpsc::channel(32);
                    let load_balancer = Arc::clone(&self.load_balancer);
                    let instance_id = instance.instance_id().to_string();
                    let started = Instant::now();

                    tokio::spawn(async move {
                        let _permit = permit;
                        let mut succeeded = false;
                        while let Some(chunk) = inner.next().await {
                            match chunk {
                                Ok(chunk) => {
                                    succeeded = true;
                                    if tx.send(Ok(chunk)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(error) => {
                                    let _ = tx.send(Err(GatewayError::Application(error))).await;
                                    break;
                                }
                            }
                        }
                        load_balancer.mark_end(&instance_id, succeeded, started.elapsed());
                    });

                    let stream = futures::stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|item| (item, rx))
                    });
                    return Ok(Box::pin(stream));
                }
                Err(_) => continue,
            }
        }

        Err(GatewayError::UpstreamUnavailable {
            last_reason: ReasonClass::ModelUnavailable,
            attempts,
        })
    }

    fn remember_idempotent(&self, request: &RequestEnvelope, envelope: &ResponseEnvelope) {
        if let Some(key) = request.idempotency_key.as_deref() {
            self.idempotency.insert(&request.tenant.id, key, envelope.clone());
        }
    }

    fn build_chain(&self, decision: &RoutingDecision) -> FallbackChain {
        let mut entries = vec![ChainEntry::new(
            decision.primary_provider.clone(),
            decision.primary_model.clone(),
        )];
        entries.extend(
            decision
                .fallback_models
                .iter()
                .map(|(provider, model)| ChainEntry::new(provider.clone(), model.clone())),
        );
        FallbackChain::new(entries)
            .max_attempts(self.executor_settings.max_attempts)
            .base_delay(self.executor_settings.base_retry_delay())
            .exponential_backoff(self.executor_settings.exponential_backoff)
    }

    fn to_completion_request(&self, request: &RequestEnvelope, decision: &RoutingDecision) -> CompletionRequest {
        let mut completion = CompletionRequest::new(
            request.tenant.id.clone(),
            decision.primary_model.clone(),
            request.messages.clone(),
        );
        completion.temperature = request.temperature;
        completion.max_tokens = request.max_tokens;
        completion.stop = request.stop.clone();
        completion.stream = request.stream;
        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tenant;
    use futures::stream::{self, BoxStream};
    use gateway_provider::{Message, Provider, StreamChunk, TokenUsage};
    use gateway_ratelimiter::Tier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct EchoProvider {
        name: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn supports(&self, _model: &str) -> bool {
            true
        }
        async fn count_tokens(&self, text: &str, _model: &str) -> u32 {
            (text.len() / 4) as u32
        }
        async fn complete(
            &self,
            request: &CompletionRequest,
            _deadline: Instant,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: request.messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                model: request.model.clone(),
                provider: self.name.to_string(),
                usage: TokenUsage {
                    prompt_tokens: 5,
                    completion_tokens: 5,
                    prompt_cost: 0.001,
                    completion_cost: 0.001,
                },
                latency_ms: 1.0,
                cached: false,
                finish_reason: Some("stop".to_string()),
            })
        }
        async fn complete_stream(
            &self,
            request: &CompletionRequest,
            _deadline: Instant,
        ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
            let content = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let chunks: Vec<_> = content
                .split_whitespace()
                .enumerate()
                .map(|(i, word)| {
                    Ok(StreamChunk {
                        delta: word.to_string(),
                        chunk_index: i as u32,
                        finish_reason: None,
                    })
                })
                .collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
        async fn health(&self) -> bool {
            true
        }
    }

    fn registry_with(providers: Vec<&'static str>) -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for name in providers {
            registry.register(Arc::new(EchoProvider {
                name,
                calls: AtomicUsize::new(0),
            }));
        }
        Arc::new(registry)
    }

    fn request(tenant: Tenant) -> RequestEnvelope {
        RequestEnvelope::new(
            "req-1",
            tenant,
            vec![Message::new("user", "hello there")],
            Instant::now() + StdDuration::from_secs(5),
        )
    }

    fn coordinator(providers: Arc<ProviderRegistry>) -> PipelineCoordinator {
        let mut config = GatewayConfig::default();
        config.executor.max_attempts = 3;
        config.executor.base_retry_delay_ms = 1;
        let coordinator = PipelineCoordinator::new(config, providers);
        for profile in gateway_router::default_model_profiles() {
            coordinator.load_balancer.register(gateway_loadbalancer::ProviderInstance::new(
                format!("{}-{}", profile.provider, profile.model),
                profile.provider,
                profile.model,
                "https://example.invalid",
            ));
        }
        coordinator
    }

    #[tokio::test]
    async fn healthy_request_is_served_by_the_registered_provider() {
        let providers = registry_with(vec!["openai", "anthropic"]);
        let coordinator = coordinator(providers);

        let response = coordinator
            .handle(request(Tenant::new("acme", Tier::Professional)))
            .await
            .unwrap();

        assert_eq!(response.content, "hello there");
        assert!(!response.cached);
    }

    #[tokio::test]
    async fn repeat_request_within_ttl_is_served_from_cache() {
        let providers = registry_with(vec!["openai", "anthropic"]);
        let coordinator = coordinator(providers);
        let tenant = Tenant::new("acme", Tier::Professional);

        coordinator.handle(request(tenant.clone())).await.unwrap();
        let second = coordinator.handle(request(tenant)).await.unwrap();

        assert!(second.cached);
        assert_eq!(second.cost, 0.0);
    }

    #[tokio::test]
    async fn idempotency_key_replays_the_stored_response() {
        let providers = registry_with(vec!["openai", "anthropic"]);
        let coordinator = coordinator(providers);
        let mut first = request(Tenant::new("acme", Tier::Professional));
        first.idempotency_key = Some("client-key-1".to_string());

        let first_response = coordinator.handle(first.clone()).await.unwrap();
        let mut second = request(Tenant::new("acme", Tier::Professional));
        second.idempotency_key = Some("client-key-1".to_string());
        let second_response = coordinator.handle(second).await.unwrap();

        assert_eq!(first_response.content, second_response.content);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_upstream_unavailable() {
        struct FailingProvider;
        #[async_trait::async_trait]
        impl Provider for FailingProvider {
            fn name(&self) -> &str {
                "openai"
            }
            fn supports(&self, _model: &str) -> bool {
                true
            }
            async fn count_tokens(&self, _text: &str, _model: &str) -> u32 {
                0
            }
            async fn complete(
                &self,
                _request: &CompletionRequest,
                _deadline: Instant,
            ) -> Result<CompletionResponse, ProviderError> {
                Err(ProviderError::Other {
                    detail: "boom".to_string(),
                })
            }
            async fn complete_stream(
                &self,
                _request: &CompletionRequest,
                _deadline: Instant,
            ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
                Err(ProviderError::Other {
                    detail: "boom".to_string(),
                })
            }
            async fn health(&self) -> bool {
                false
            }
        }

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FailingProvider));
        let coordinator = coordinator(Arc::new(registry));

        let result = coordinator
            .handle(request(Tenant::new("acme", Tier::Professional)))
            .await;

        assert!(matches!(result, Err(GatewayError::UpstreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn eleventh_request_in_a_minute_is_rate_limited() {
        let providers = registry_with(vec!["openai", "anthropic"]);
        let coordinator = coordinator(providers);
        let tenant = Tenant::new("acme", Tier::Free);

        for _ in 0..10 {
            // Free tier's default is 10 requests/minute; vary the body so
            // the cache doesn't short-circuit admission checks entirely.
            let _ = coordinator.handle(request(tenant.clone())).await;
        }

        let result = coordinator.handle(request(tenant)).await;
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn streamed_request_forwards_every_chunk() {
        let providers = registry_with(vec!["openai", "anthropic"]);
        let coordinator = coordinator(providers);

        let mut stream = coordinator
            .handle_stream(request(Tenant::new("acme", Tier::Professional)))
            .await
            .unwrap();

        let mut words = Vec::new();
        while let Some(chunk) = stream.next().await {
            words.push(chunk.unwrap().delta);
        }

        assert_eq!(words, vec!["hello".to_string(), "there".to_string()]);
    }

    #[tokio::test]
    async fn oversized_prompt_is_a_bad_request_not_unauthorized() {
        let providers = registry_with(vec!["openai", "anthropic"]);
        let coordinator = coordinator(providers);
        let mut oversized = request(Tenant::new("acme", Tier::Enterprise));
        oversized.messages = vec![Message::new("user", "x".repeat(900_000))];

        let result = coordinator.handle(oversized).await;

        assert!(matches!(result, Err(GatewayError::BadRequest { .. })));
    }
}
