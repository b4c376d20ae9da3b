//! The `Provider` capability: the abstract boundary between the gateway and
//! concrete LLM backends.
//!
//! Every other pattern in this workspace (the router, the load balancer, the
//! fallback executor) operates on `(provider, model)` pairs without ever
//! calling a backend directly. This crate is where that boundary is crossed:
//! a [`Provider`] adapter knows how to actually complete a request against
//! one backend, and [`CompletionAdapter`] wires a [`ProviderRegistry`] of
//! them into `gateway_fallback::CompletionProvider`, so the executor can
//! drive real traffic without depending on any concrete backend.
//!
//! ```rust
//! use gateway_provider::{CompletionAdapter, ProviderRegistry};
//! use std::sync::Arc;
//!
//! let registry = ProviderRegistry::new();
//! let adapter = CompletionAdapter::new(Arc::new(registry));
//! ```

mod config;
mod error;
mod metrics;
mod registry;
mod types;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use metrics::{ProviderMetrics, ProviderStatus};
pub use registry::{CompletionAdapter, Provider, ProviderRegistry};
pub use types::{CompletionRequest, CompletionResponse, Message, StreamChunk, TokenUsage};
