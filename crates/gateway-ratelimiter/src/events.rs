//! Events emitted by the rate limiter.

use std::time::{Duration, Instant};
use gateway_core::GatewayEvent;

/// Events emitted by the rate limiter pattern.
#[derive(Debug, Clone)]
pub enum RateLimiterEvent {
    /// A request acquired a permit, possibly after waiting.
    PermitAcquired {
        /// Name of the rate limiter instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// How long the request waited before the permit was granted.
        wait_duration: Duration,
    },

    /// A request was rejected because no permit became available within
    /// `timeout_duration`.
    PermitRejected {
        /// Name of the rate limiter instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The configured timeout that was exceeded.
        timeout_duration: Duration,
    },

    /// Permits were reset at the start of a new period.
    PermitsRefreshed {
        /// Name of the rate limiter instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Permits available immediately after the refresh.
        available_permits: usize,
    },
}

impl GatewayEvent for RateLimiterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::PermitAcquired { .. } => "permit_acquired",
            Self::PermitRejected { .. } => "permit_rejected",
            Self::PermitsRefreshed { .. } => "permits_refreshed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            Self::PermitAcquired { timestamp, .. }
            | Self::PermitRejected { timestamp, .. }
            | Self::PermitsRefreshed { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            Self::PermitAcquired { pattern_name, .. }
            | Self::PermitRejected { pattern_name, .. }
            | Self::PermitsRefreshed { pattern_name, .. } => pattern_name,
        }
    }
}
