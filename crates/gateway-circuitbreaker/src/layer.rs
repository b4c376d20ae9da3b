use crate::config::CircuitBreakerConfig;
use crate::CircuitBreaker;
use std::sync::Arc;
use tower::Layer;

/// A Tower `Layer` that applies circuit breaker logic to an inner service.
///
/// For the single-service case, wrap a `tower::Service` directly with this
/// layer. For the gateway's per-`(provider, model)` breakers, prefer
/// [`crate::registry::CircuitBreakerRegistry`] instead, which keys many
/// independent breakers off one configuration.
///
/// # Example
///
/// ```rust
/// use tower::{ServiceBuilder, service_fn};
/// use gateway_circuitbreaker::CircuitBreakerLayer;
///
/// let layer = CircuitBreakerLayer::<String, std::io::Error>::builder()
///     .failure_rate_threshold(0.5)
///     .build();
///
/// let service = ServiceBuilder::new()
///     .layer(layer)
///     .service(service_fn(|req: String| async move { Ok::<_, std::io::Error>(req) }));
/// ```
#[derive(Clone)]
pub struct CircuitBreakerLayer<Res, Err> {
    config: Arc<CircuitBreakerConfig<Res, Err>>,
}

impl<Res, Err> CircuitBreakerLayer<Res, Err> {
    pub(crate) fn new(config: impl Into<Arc<CircuitBreakerConfig<Res, Err>>>) -> Self {
        Self {
            config: config.into(),
        }
    }

    /// Creates a new builder for configuring a circuit breaker layer.
    pub fn builder() -> crate::CircuitBreakerConfigBuilder<Res, Err> {
        crate::CircuitBreakerConfigBuilder::new()
    }
}

impl<S, Req, Res, Err> Layer<S> for CircuitBreakerLayer<Res, Err>
where
    S: tower::Service<Req, Response = Res, Error = Err>,
{
    type Service = CircuitBreaker<S, Req, Res, Err>;

    fn layer(&self, service: S) -> Self::Service {
        CircuitBreaker::new(service, Arc::clone(&self.config))
    }
}
