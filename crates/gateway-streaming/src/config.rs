use std::time::Duration;

/// Tunables for the fan-out layer. Defaults match what the gateway ships
/// with out of the box.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub heartbeat_interval_s: u64,
    pub heartbeat_timeout_s: u64,
    pub max_connections_per_user: usize,
    pub max_message_size_bytes: usize,
    pub reconnect_window_s: u64,
    pub outbound_queue_capacity: usize,
}

impl StreamingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_s)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_s)
    }

    pub fn reconnect_window(&self) -> Duration {
        Duration::from_secs(self.reconnect_window_s)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_s: 30,
            heartbeat_timeout_s: 60,
            max_connections_per_user: 5,
            max_message_size_bytes: 1_048_576,
            reconnect_window_s: 300,
            outbound_queue_capacity: 256,
        }
    }
}
