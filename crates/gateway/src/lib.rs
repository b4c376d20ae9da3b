//! Request-orchestration pipeline for a multi-tenant LLM gateway.
//!
//! This crate wires together the independent pattern crates in this
//! workspace — routing, fallback, load balancing, caching, rate limiting,
//! circuit breaking, bulkheads and streaming — into the single request path
//! every completion travels: [`PipelineCoordinator::handle`].
//!
//! Each pattern crate is usable standalone; this crate's job is composition,
//! not reimplementation. [`config::GatewayConfig`] is the one place an
//! operator tunes all of them together, loaded from TOML at startup.
//!
//! ```rust,no_run
//! use gateway::config::GatewayConfig;
//! use gateway::coordinator::PipelineCoordinator;
//! use gateway_provider::ProviderRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = GatewayConfig::default();
//! let providers = Arc::new(ProviderRegistry::new());
//! let coordinator = PipelineCoordinator::new(config, providers);
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod idempotency;
pub mod types;

pub use config::{ConfigError, GatewayConfig};
pub use coordinator::PipelineCoordinator;
pub use idempotency::IdempotencyStore;
pub use types::{RequestEnvelope, ResponseEnvelope, Tenant, TenantFlags};
