//! Model routing for the LLM gateway: turns a request context into a ranked
//! `(provider, model)` chain plus a one-line rationale.
//!
//! [`ModelRouter`] owns a seed [`ModelProfile`] table and dispatches to one
//! of four [`strategy`] functions — cost-optimized, performance-optimized,
//! capability-based, or adaptive — either picked by the caller or inferred
//! from the request via [`router::ModelRouter::route`]'s own heuristic.
//! Routing is pure and side-effect-free except for the adaptive strategy's
//! own history, updated only through [`ModelRouter::update_observation`].
//!
//! ```rust
//! use gateway_router::ModelRouter;
//!
//! let router = ModelRouter::new();
//! let decision = router.route_query("write a poem about the sea", "professional", None).unwrap();
//! println!("{} -> {}", decision.strategy_used.as_str(), decision.primary_model);
//! ```

mod error;
mod events;
mod profiles;
mod router;
mod strategy;
mod task;
mod types;

pub use error::RouterError;
pub use events::RouterEvent;
pub use profiles::default_model_profiles;
pub use router::{ModelRouter, RoutingStatsSnapshot};
pub use strategy::AdaptiveHistory;
pub use task::{detect_task_type, estimate_tokens, required_capabilities};
pub use types::{
    ModelCapability, ModelProfile, RoutingContext, RoutingDecision, RoutingStrategyName, TaskType,
};
