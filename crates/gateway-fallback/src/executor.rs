//! Chain-wide fallback executor.
//!
//! [`crate::Fallback`] wraps a single [`tower::Service`] with one substitute
//! value or service. The gateway's failover path needs more than that: an
//! ordered list of `(provider, model)` instances, a circuit breaker per
//! pair, a process-wide retry budget shared across every concurrent request,
//! and a deadline that bounds the whole chain rather than one call.
//! [`FallbackExecutor`] builds that on top of the circuit breaker and retry
//! budget crates' existing state machines, reused unchanged, plus two trait
//! seams ([`LoadBalancer`] and [`CompletionProvider`]) so this crate doesn't
//! need a hard dependency on the load balancer or provider adapter crates.

use gateway_circuitbreaker::CircuitBreakerRegistry;
use gateway_core::error::ReasonClass;
use gateway_core::events::EventListeners;
use gateway_core::GatewayEvent;
use gateway_retry::RetryBudget;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One `(provider, model)` entry in an ordered fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub provider: String,
    pub model: String,
}

impl ChainEntry {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// An ordered list of instances to try, plus the backoff schedule between
/// attempts.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    pub entries: Vec<ChainEntry>,
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub exponential_backoff: bool,
}

impl FallbackChain {
    /// Builds a chain that tries every entry once, in order, with a 100ms
    /// base delay and exponential backoff between attempts.
    pub fn new(entries: Vec<ChainEntry>) -> Self {
        let max_attempts = entries.len();
        Self {
            entries,
            max_attempts,
            base_delay: Duration::from_millis(100),
            exponential_backoff: true,
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        if self.exponential_backoff {
            self.base_delay
                .saturating_mul(1u32 << (attempt - 1).min(16))
        } else {
            self.base_delay
        }
    }
}

/// A single backend instance of a `(provider, model)` pair, as selected by
/// the load balancer.
pub trait Instance: Send + Sync {
    /// Stable identifier the load balancer uses to track in-flight count and
    /// latency for this specific instance (e.g. a region or endpoint id).
    fn instance_id(&self) -> &str;

    /// Name of the backend this instance belongs to (e.g. `"openai"`), used
    /// by the completion provider to pick an adapter.
    fn provider(&self) -> &str;

    /// Model id this instance serves.
    fn model(&self) -> &str;

    /// Address the adapter should dial.
    fn endpoint(&self) -> &str;
}

/// Selects and tracks the health of instances for a `(provider, model)`
/// pair. Implemented by the load balancer's instance registry.
pub trait LoadBalancer<Req>: Send + Sync {
    /// Picks a healthy instance for `(provider, model)`, or `None` if every
    /// instance is down or draining.
    fn select(&self, provider: &str, model: &str, request: &Req) -> Option<Arc<dyn Instance>>;

    /// Marks the start of an attempt against `instance` (in-flight++).
    fn record_attempt_start(&self, instance: &dyn Instance);

    /// Marks a successful completion (in-flight--, EMA latency update,
    /// health improves).
    fn record_success(&self, instance: &dyn Instance, latency: Duration);

    /// Marks a failed completion (in-flight--, health degrades).
    fn record_failure(&self, instance: &dyn Instance);
}

/// The outcome of one attempt against a provider instance.
pub enum AttemptError<E> {
    /// Classified as retryable; the executor advances the chain.
    Retryable { error: E, reason: ReasonClass },
    /// Authentication failure, content-policy violation, tenant quota
    /// exhaustion, or any other error the chain must not paper over.
    /// Aborts the whole execution immediately.
    Fatal { error: E },
}

/// Executes one request against one already-selected instance, with the
/// remaining deadline for that attempt. Implemented by the provider
/// adapters.
#[async_trait::async_trait]
pub trait CompletionProvider<Req, Res>: Send + Sync {
    type Error;

    async fn complete(
        &self,
        instance: &dyn Instance,
        request: &Req,
        deadline: Instant,
    ) -> Result<Res, AttemptError<Self::Error>>;
}

/// Events describing the path a chain execution took.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// An entry was skipped without an attempt (breaker open, no healthy
    /// instance, or retry budget exhausted).
    Skipped {
        pattern_name: String,
        timestamp: Instant,
        provider: String,
        model: String,
        reason: &'static str,
    },
    /// An attempt was made and failed with a retryable reason.
    AttemptFailed {
        pattern_name: String,
        timestamp: Instant,
        provider: String,
        model: String,
        attempt: usize,
        reason: ReasonClass,
    },
    /// An attempt succeeded; this is the terminal event for the execution.
    AttemptSucceeded {
        pattern_name: String,
        timestamp: Instant,
        provider: String,
        model: String,
        attempt: usize,
        latency: Duration,
    },
    /// A fatal, non-retryable error aborted the whole chain.
    Aborted {
        pattern_name: String,
        timestamp: Instant,
        provider: String,
        model: String,
        attempt: usize,
    },
    /// Every entry was skipped or failed; the chain is exhausted.
    Exhausted {
        pattern_name: String,
        timestamp: Instant,
        last_reason: ReasonClass,
        attempts: usize,
    },
}

impl GatewayEvent for ChainEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::AttemptFailed { .. } => "attempt_failed",
            Self::AttemptSucceeded { .. } => "attempt_succeeded",
            Self::Aborted { .. } => "aborted",
            Self::Exhausted { .. } => "exhausted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            Self::Skipped { timestamp, .. }
            | Self::AttemptFailed { timestamp, .. }
            | Self::AttemptSucceeded { timestamp, .. }
            | Self::Aborted { timestamp, .. }
            | Self::Exhausted { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            Self::Skipped { pattern_name, .. }
            | Self::AttemptFailed { pattern_name, .. }
            | Self::AttemptSucceeded { pattern_name, .. }
            | Self::Aborted { pattern_name, .. }
            | Self::Exhausted { pattern_name, .. } => pattern_name,
        }
    }
}

/// The terminal outcome of [`FallbackExecutor::execute`] when no response
/// was produced.
#[derive(Debug)]
pub enum FallbackExecutorError<E> {
    /// A fatal, non-retryable error aborted the chain early.
    Fatal(E),
    /// Every entry in the chain was tried (or skipped) without success.
    Exhausted {
        last_reason: ReasonClass,
        attempts: usize,
    },
}

impl<E> From<FallbackExecutorError<E>> for gateway_core::GatewayError<E> {
    fn from(err: FallbackExecutorError<E>) -> Self {
        match err {
            FallbackExecutorError::Fatal(e) => gateway_core::GatewayError::Application(e),
            FallbackExecutorError::Exhausted {
                last_reason,
                attempts,
            } => gateway_core::GatewayError::UpstreamUnavailable {
                last_reason,
                attempts,
            },
        }
    }
}

/// Shared configuration for a [`FallbackExecutor`].
pub struct FallbackExecutorConfig {
    pub circuit_breaker: Arc<CircuitBreakerRegistry>,
    pub retry_budget: Arc<dyn RetryBudget>,
    pub event_listeners: EventListeners<ChainEvent>,
    pub name: String,
}

/// Runs a [`FallbackChain`] against a [`LoadBalancer`] and
/// [`CompletionProvider`], honoring circuit-breaker state, a process-wide
/// retry budget, and a global deadline.
pub struct FallbackExecutor<Req, Res, P, L>
where
    P: CompletionProvider<Req, Res>,
    L: LoadBalancer<Req>,
{
    provider: Arc<P>,
    load_balancer: Arc<L>,
    config: Arc<FallbackExecutorConfig>,
    _marker: std::marker::PhantomData<fn(Req) -> Res>,
}

impl<Req, Res, P, L> FallbackExecutor<Req, Res, P, L>
where
    P: CompletionProvider<Req, Res>,
    L: LoadBalancer<Req>,
{
    pub fn new(provider: Arc<P>, load_balancer: Arc<L>, config: Arc<FallbackExecutorConfig>) -> Self {
        Self {
            provider,
            load_balancer,
            config,
            _marker: std::marker::PhantomData,
        }
    }

    fn emit(&self, event: ChainEvent) {
        self.config.event_listeners.emit(&event);
    }

    /// Runs `request` through `chain`, stopping at the first success,
    /// a fatal error, or an elapsed `deadline`.
    pub async fn execute(
        &self,
        chain: &FallbackChain,
        request: &Req,
        deadline: Instant,
    ) -> Result<Res, FallbackExecutorError<P::Error>> {
        let attempts = chain.max_attempts.min(chain.entries.len());
        let mut last_reason = ReasonClass::ModelUnavailable;
        let mut attempts_made = 0usize;

        for (attempt, entry) in chain.entries.iter().take(attempts).enumerate() {
            if attempt > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let delay = chain.delay_for_attempt(attempt).min(remaining);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            if Instant::now() >= deadline {
                break;
            }

            if !self
                .config
                .circuit_breaker
                .try_acquire(&entry.provider, &entry.model)
                .await
            {
                self.emit(ChainEvent::Skipped {
                    pattern_name: self.config.name.clone(),
                    timestamp: Instant::now(),
                    provider: entry.provider.clone(),
                    model: entry.model.clone(),
                    reason: "circuit_open",
                });
                continue;
            }

            let instance = match self
                .load_balancer
                .select(&entry.provider, &entry.model, request)
            {
                Some(instance) => instance,
                None => {
                    self.emit(ChainEvent::Skipped {
                        pattern_name: self.config.name.clone(),
                        timestamp: Instant::now(),
                        provider: entry.provider.clone(),
                        model: entry.model.clone(),
                        reason: "no_healthy_instance",
                    });
                    continue;
                }
            };

            if attempt > 0 && !self.config.retry_budget.try_withdraw() {
                self.emit(ChainEvent::Skipped {
                    pattern_name: self.config.name.clone(),
                    timestamp: Instant::now(),
                    provider: entry.provider.clone(),
                    model: entry.model.clone(),
                    reason: "retry_budget_exhausted",
                });
                continue;
            }

            self.load_balancer.record_attempt_start(instance.as_ref());
            attempts_made += 1;
            let started = Instant::now();

            match self
                .provider
                .complete(instance.as_ref(), request, deadline)
                .await
            {
                Ok(response) => {
                    let latency = started.elapsed();
                    self.load_balancer.record_success(instance.as_ref(), latency);
                    self.config
                        .circuit_breaker
                        .record_success(&entry.provider, &entry.model, latency)
                        .await;
                    self.config.retry_budget.deposit();
                    self.emit(ChainEvent::AttemptSucceeded {
                        pattern_name: self.config.name.clone(),
                        timestamp: Instant::now(),
                        provider: entry.provider.clone(),
                        model: entry.model.clone(),
                        attempt,
                        latency,
                    });
                    return Ok(response);
                }
                Err(AttemptError::Fatal { error }) => {
                    let latency = started.elapsed();
                    self.load_balancer.record_failure(instance.as_ref());
                    self.config
                        .circuit_breaker
                        .record_failure(&entry.provider, &entry.model, latency)
                        .await;
                    self.emit(ChainEvent::Aborted {
                        pattern_name: self.config.name.clone(),
                        timestamp: Instant::now(),
                        provider: entry.provider.clone(),
                        model: entry.model.clone(),
                        attempt,
                    });
                    return Err(FallbackExecutorError::Fatal(error));
                }
                Err(AttemptError::Retryable { reason, .. }) => {
                    let latency = started.elapsed();
                    self.load_balancer.record_failure(instance.as_ref());
                    self.config
                        .circuit_breaker
                        .record_failure(&entry.provider, &entry.model, latency)
                        .await;
                    last_reason = reason;
                    self.emit(ChainEvent::AttemptFailed {
                        pattern_name: self.config.name.clone(),
                        timestamp: Instant::now(),
                        provider: entry.provider.clone(),
                        model: entry.model.clone(),
                        attempt,
                        reason,
                    });
                }
            }
        }

        self.emit(ChainEvent::Exhausted {
            pattern_name: self.config.name.clone(),
            timestamp: Instant::now(),
            last_reason,
            attempts: attempts_made,
        });
        Err(FallbackExecutorError::Exhausted {
            last_reason,
            attempts: attempts_made,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_circuitbreaker::CircuitBreakerConfig;
    use gateway_retry::RetryBudgetBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeInstance {
        id: String,
        provider: String,
        model: String,
    }
    impl Instance for FakeInstance {
        fn instance_id(&self) -> &str {
            &self.id
        }
        fn provider(&self) -> &str {
            &self.provider
        }
        fn model(&self) -> &str {
            &self.model
        }
        fn endpoint(&self) -> &str {
            "fake://local"
        }
    }

    struct AlwaysHealthy;
    impl LoadBalancer<String> for AlwaysHealthy {
        fn select(&self, provider: &str, model: &str, _request: &String) -> Option<Arc<dyn Instance>> {
            Some(Arc::new(FakeInstance {
                id: format!("{provider}/{model}"),
                provider: provider.to_string(),
                model: model.to_string(),
            }))
        }
        fn record_attempt_start(&self, _instance: &dyn Instance) {}
        fn record_success(&self, _instance: &dyn Instance, _latency: Duration) {}
        fn record_failure(&self, _instance: &dyn Instance) {}
    }

    struct NeverHealthy;
    impl LoadBalancer<String> for NeverHealthy {
        fn select(&self, _provider: &str, _model: &str, _request: &String) -> Option<Arc<dyn Instance>> {
            None
        }
        fn record_attempt_start(&self, _instance: &dyn Instance) {}
        fn record_success(&self, _instance: &dyn Instance, _latency: Duration) {}
        fn record_failure(&self, _instance: &dyn Instance) {}
    }

    /// Fails the first N attempts with a retryable reason, then succeeds.
    struct FailNTimes {
        remaining_failures: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CompletionProvider<String, String> for FailNTimes {
        type Error = String;

        async fn complete(
            &self,
            instance: &dyn Instance,
            request: &String,
            _deadline: Instant,
        ) -> Result<String, AttemptError<String>> {
            self.calls.lock().unwrap().push(instance.instance_id().to_string());
            if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { None }
            }).is_ok() {
                Err(AttemptError::Retryable {
                    error: "boom".to_string(),
                    reason: ReasonClass::ProviderError,
                })
            } else {
                Ok(format!("ok:{request}"))
            }
        }
    }

    struct AlwaysFatal;
    #[async_trait::async_trait]
    impl CompletionProvider<String, String> for AlwaysFatal {
        type Error = String;

        async fn complete(
            &self,
            _instance: &dyn Instance,
            _request: &String,
            _deadline: Instant,
        ) -> Result<String, AttemptError<String>> {
            Err(AttemptError::Fatal {
                error: "unauthorized".to_string(),
            })
        }
    }

    fn test_breaker() -> Arc<CircuitBreakerRegistry> {
        let config = CircuitBreakerConfig::<(), ()>::builder()
            .failure_rate_threshold(0.99)
            .sliding_window_size(100)
            .minimum_number_of_calls(100)
            .wait_duration_in_open(Duration::from_millis(10))
            .build_config();
        Arc::new(CircuitBreakerRegistry::new(config))
    }

    fn test_config(name: &str) -> Arc<FallbackExecutorConfig> {
        Arc::new(FallbackExecutorConfig {
            circuit_breaker: test_breaker(),
            retry_budget: RetryBudgetBuilder::new()
                .token_bucket()
                .max_tokens(100)
                .build(),
            event_listeners: EventListeners::new(),
            name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn succeeds_on_first_healthy_entry() {
        let chain = FallbackChain::new(vec![ChainEntry::new("openai", "gpt-4")]);
        let provider = Arc::new(FailNTimes {
            remaining_failures: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        });
        let executor = FallbackExecutor::new(provider, Arc::new(AlwaysHealthy), test_config("chain"));

        let result = executor
            .execute(&chain, &"hi".to_string(), Instant::now() + Duration::from_secs(1))
            .await;
        assert_eq!(result.unwrap(), "ok:hi");
    }

    #[tokio::test]
    async fn falls_back_to_second_entry_on_retryable_failure() {
        let chain = FallbackChain::new(vec![
            ChainEntry::new("openai", "gpt-4"),
            ChainEntry::new("anthropic", "claude-3-opus"),
        ])
        .base_delay(Duration::from_millis(1));
        let provider = Arc::new(FailNTimes {
            remaining_failures: AtomicUsize::new(1),
            calls: Mutex::new(Vec::new()),
        });
        let executor = FallbackExecutor::new(provider, Arc::new(AlwaysHealthy), test_config("chain"));

        let result = executor
            .execute(&chain, &"hi".to_string(), Instant::now() + Duration::from_secs(1))
            .await;
        assert_eq!(result.unwrap(), "ok:hi");
    }

    #[tokio::test]
    async fn fatal_error_aborts_without_trying_remaining_entries() {
        let chain = FallbackChain::new(vec![
            ChainEntry::new("openai", "gpt-4"),
            ChainEntry::new("anthropic", "claude-3-opus"),
        ]);
        let executor = FallbackExecutor::new(Arc::new(AlwaysFatal), Arc::new(AlwaysHealthy), test_config("chain"));

        let result = executor
            .execute(&chain, &"hi".to_string(), Instant::now() + Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(FallbackExecutorError::Fatal(_))));
    }

    #[tokio::test]
    async fn no_healthy_instance_skips_to_exhaustion() {
        let chain = FallbackChain::new(vec![ChainEntry::new("openai", "gpt-4")]).base_delay(Duration::from_millis(1));
        let provider = Arc::new(FailNTimes {
            remaining_failures: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        });
        let executor = FallbackExecutor::new(provider, Arc::new(NeverHealthy), test_config("chain"));

        let result = executor
            .execute(&chain, &"hi".to_string(), Instant::now() + Duration::from_secs(1))
            .await;
        assert!(matches!(
            result,
            Err(FallbackExecutorError::Exhausted { attempts: 0, .. })
        ));
    }

    #[tokio::test]
    async fn elapsed_deadline_stops_before_further_attempts() {
        let chain = FallbackChain::new(vec![
            ChainEntry::new("openai", "gpt-4"),
            ChainEntry::new("anthropic", "claude-3-opus"),
        ])
        .base_delay(Duration::from_millis(200));
        let provider = Arc::new(FailNTimes {
            remaining_failures: AtomicUsize::new(10),
            calls: Mutex::new(Vec::new()),
        });
        let executor = FallbackExecutor::new(provider, Arc::new(AlwaysHealthy), test_config("chain"));

        let result = executor
            .execute(&chain, &"hi".to_string(), Instant::now() + Duration::from_millis(50))
            .await;
        assert!(matches!(
            result,
            Err(FallbackExecutorError::Exhausted { attempts: 1, .. })
        ));
    }
}
