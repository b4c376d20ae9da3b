//! Observability hook for the fan-out layer, mirroring the `GatewayEvent`
//! pattern used by the router and load balancer.

use gateway_core::GatewayEvent;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Connected {
        pattern_name: String,
        timestamp: Instant,
        connection_id: String,
        user_id: String,
    },
    Disconnected {
        pattern_name: String,
        timestamp: Instant,
        connection_id: String,
        reason: String,
    },
    HeartbeatTimeout {
        pattern_name: String,
        timestamp: Instant,
        connection_id: String,
    },
    Reconnected {
        pattern_name: String,
        timestamp: Instant,
        old_connection_id: String,
        new_connection_id: String,
    },
    MessageDropped {
        pattern_name: String,
        timestamp: Instant,
        connection_id: String,
        reason: &'static str,
    },
}

impl GatewayEvent for StreamEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Disconnected { .. } => "disconnected",
            StreamEvent::HeartbeatTimeout { .. } => "heartbeat_timeout",
            StreamEvent::Reconnected { .. } => "reconnected",
            StreamEvent::MessageDropped { .. } => "message_dropped",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            StreamEvent::Connected { timestamp, .. }
            | StreamEvent::Disconnected { timestamp, .. }
            | StreamEvent::HeartbeatTimeout { timestamp, .. }
            | StreamEvent::Reconnected { timestamp, .. }
            | StreamEvent::MessageDropped { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            StreamEvent::Connected { pattern_name, .. }
            | StreamEvent::Disconnected { pattern_name, .. }
            | StreamEvent::HeartbeatTimeout { pattern_name, .. }
            | StreamEvent::Reconnected { pattern_name, .. }
            | StreamEvent::MessageDropped { pattern_name, .. } => pattern_name,
        }
    }
}
