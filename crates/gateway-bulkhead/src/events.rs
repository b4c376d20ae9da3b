//! Event types for the bulkhead pattern.

use gateway_core::events::GatewayEvent;
use std::time::{Duration, Instant};

/// Events emitted by a bulkhead instance.
#[derive(Debug, Clone)]
pub enum BulkheadEvent {
    /// A call was permitted through the bulkhead.
    CallPermitted {
        pattern_name: String,
        timestamp: Instant,
        concurrent_calls: usize,
    },
    /// A call was rejected because the bulkhead is full.
    CallRejected {
        pattern_name: String,
        timestamp: Instant,
        max_concurrent_calls: usize,
    },
    /// A call finished successfully.
    CallFinished {
        pattern_name: String,
        timestamp: Instant,
        duration: Duration,
    },
    /// A call finished with an error.
    CallFailed {
        pattern_name: String,
        timestamp: Instant,
        duration: Duration,
    },
}

impl GatewayEvent for BulkheadEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BulkheadEvent::CallPermitted { .. } => "call_permitted",
            BulkheadEvent::CallRejected { .. } => "call_rejected",
            BulkheadEvent::CallFinished { .. } => "call_finished",
            BulkheadEvent::CallFailed { .. } => "call_failed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            BulkheadEvent::CallPermitted { timestamp, .. }
            | BulkheadEvent::CallRejected { timestamp, .. }
            | BulkheadEvent::CallFinished { timestamp, .. }
            | BulkheadEvent::CallFailed { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            BulkheadEvent::CallPermitted { pattern_name, .. }
            | BulkheadEvent::CallRejected { pattern_name, .. }
            | BulkheadEvent::CallFinished { pattern_name, .. }
            | BulkheadEvent::CallFailed { pattern_name, .. } => pattern_name,
        }
    }
}
