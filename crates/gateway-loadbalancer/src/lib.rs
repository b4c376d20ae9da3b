//! Instance registry and selection strategies for the LLM gateway.
//!
//! The fallback executor (`gateway-fallback`) needs to turn a
//! `(provider, model)` pair into one concrete, healthy backend instance,
//! and to learn from every attempt's outcome. This crate owns that: a
//! [`LoadBalancerRegistry`] tracks in-flight count, error rate, and latency
//! per instance, derives a health score from them, and picks among the
//! available replicas using one of several [`LoadBalancingStrategy`]
//! variants. It implements `gateway_fallback::LoadBalancer` directly, so
//! the executor can drive it without depending on this crate's concrete
//! types.
//!
//! ```rust
//! use gateway_loadbalancer::{LoadBalancerRegistry, LoadBalancingStrategy, ProviderInstance};
//!
//! let registry = LoadBalancerRegistry::new(LoadBalancingStrategy::Adaptive);
//! registry.register(ProviderInstance::new("openai-east-1", "openai", "gpt-4", "https://east.example"));
//! registry.register(ProviderInstance::new("openai-west-1", "openai", "gpt-4", "https://west.example"));
//!
//! if let Some(instance) = registry.select_instance("openai", "gpt-4", None) {
//!     registry.mark_start(instance.provider_instance().id.as_str());
//!     // ... call the provider ...
//!     registry.mark_end(instance.provider_instance().id.as_str(), true, std::time::Duration::from_millis(120));
//! }
//! ```

mod events;
mod instance;
mod registry;
mod strategy;

pub use events::LoadBalancerEvent;
pub use instance::{ManagedInstance, ProviderInstance};
pub use registry::{LoadBalancerRegistry, RequestKey};
pub use strategy::LoadBalancingStrategy;
