//! Events emitted by the router. Routing is pure and side-effect-free
//! besides these, per the crate's own invariant.

use crate::types::RoutingStrategyName;
use gateway_core::GatewayEvent;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// A chain was produced for a request.
    Routed {
        pattern_name: String,
        timestamp: Instant,
        strategy: RoutingStrategyName,
        provider: String,
        model: String,
        score: f64,
    },
    /// No model profile satisfied the context's constraints.
    NoEligibleModels {
        pattern_name: String,
        timestamp: Instant,
        tenant_tier: String,
    },
}

impl GatewayEvent for RouterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RouterEvent::Routed { .. } => "routed",
            RouterEvent::NoEligibleModels { .. } => "no_eligible_models",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RouterEvent::Routed { timestamp, .. } | RouterEvent::NoEligibleModels { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            RouterEvent::Routed { pattern_name, .. } | RouterEvent::NoEligibleModels { pattern_name, .. } => {
                pattern_name
            }
        }
    }
}
