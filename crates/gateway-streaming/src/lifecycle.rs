//! Background tasks that keep a node's registry honest: heartbeat pings
//! and dead-connection eviction, periodic index cleanup, and node
//! re-registration in the cluster directory.

use crate::cluster::{NodeDirectory, NodeInfo};
use crate::registry::ConnectionRegistry;
use crate::types::{Message, MessageType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const NODE_REGISTRATION_TTL: Duration = Duration::from_secs(120);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Every `heartbeat_interval`, pings connections that have gone quiet and
/// evicts any that blew past `heartbeat_timeout` without a reply.
pub fn spawn_heartbeat_loop(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let (due_for_ping, dead) = registry.heartbeat_sweep(interval, timeout);

            for conn_id in due_for_ping {
                let ping = Message::new(MessageType::Heartbeat, "ping", registry.node_id().to_string());
                let _ = registry.send_message(conn_id, ping).await;
            }

            for conn_id in dead {
                registry.mark_heartbeat_timeout(conn_id);
                let _ = registry.disconnect(conn_id, "heartbeat timeout").await;
            }
        }
    })
}

/// Every minute, drops empty index buckets and refreshes this node's
/// cluster directory entry so siblings don't see it expire.
pub fn spawn_cleanup_loop(
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn NodeDirectory>,
    region: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            registry.sweep_empty_indices();

            let info = NodeInfo {
                node_id: registry.node_id().to_string(),
                region: region.clone(),
                connections: registry.connection_count(),
                last_update: Instant::now(),
            };
            directory.register(info, NODE_REGISTRATION_TTL).await;
        }
    })
}
