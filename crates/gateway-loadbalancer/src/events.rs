//! Events emitted by the load balancer registry.

use gateway_core::GatewayEvent;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum LoadBalancerEvent {
    /// No available instance matched a selection request.
    NoHealthyInstance {
        pattern_name: String,
        timestamp: Instant,
        provider: String,
        model: String,
    },
    /// An instance's health score dropped below the availability floor and
    /// it was excluded from selection.
    InstanceMarkedUnavailable {
        pattern_name: String,
        timestamp: Instant,
        instance_id: String,
        health_score: f64,
    },
    /// A previously-unavailable instance passed a health probe and is back
    /// in rotation.
    InstanceRecovered {
        pattern_name: String,
        timestamp: Instant,
        instance_id: String,
        health_score: f64,
    },
}

impl GatewayEvent for LoadBalancerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::NoHealthyInstance { .. } => "no_healthy_instance",
            Self::InstanceMarkedUnavailable { .. } => "instance_marked_unavailable",
            Self::InstanceRecovered { .. } => "instance_recovered",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            Self::NoHealthyInstance { timestamp, .. }
            | Self::InstanceMarkedUnavailable { timestamp, .. }
            | Self::InstanceRecovered { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            Self::NoHealthyInstance { pattern_name, .. }
            | Self::InstanceMarkedUnavailable { pattern_name, .. }
            | Self::InstanceRecovered { pattern_name, .. } => pattern_name,
        }
    }
}
