//! Node directory: lets a node announce itself and lets any node ask who
//! else is in the cluster. Like [`crate::bus::PubSubBus`], this is a seam
//! over shared external state — [`LocalDirectory`] is the single-node
//! stand-in.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node_id: String,
    pub region: String,
    pub connections: usize,
    pub last_update: Instant,
}

#[derive(Debug, Clone)]
pub struct ClusterStatus {
    pub nodes: Vec<NodeInfo>,
    pub total_nodes: usize,
    pub total_connections: usize,
    pub regions: Vec<String>,
}

/// Registers this node's presence and answers cluster-wide status queries.
/// A real deployment backs this with the same external cache as the
/// pub/sub bus, with a TTL on each node's entry; [`LocalDirectory`] uses an
/// explicit expiry check instead of relying on the store to expire keys.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn register(&self, info: NodeInfo, ttl: Duration);
    async fn unregister(&self, node_id: &str);
    async fn snapshot(&self) -> Vec<NodeInfo>;
}

struct Registration {
    info: NodeInfo,
    expires_at: Instant,
}

pub struct LocalDirectory {
    nodes: Mutex<HashMap<String, Registration>>,
}

impl LocalDirectory {
    pub fn new() -> Self {
        Self { nodes: Mutex::new(HashMap::new()) }
    }
}

impl Default for LocalDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeDirectory for LocalDirectory {
    async fn register(&self, info: NodeInfo, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.nodes.lock().unwrap().insert(info.node_id.clone(), Registration { info, expires_at });
    }

    async fn unregister(&self, node_id: &str) {
        self.nodes.lock().unwrap().remove(node_id);
    }

    async fn snapshot(&self) -> Vec<NodeInfo> {
        let now = Instant::now();
        let mut nodes = self.nodes.lock().unwrap();
        nodes.retain(|_, reg| reg.expires_at > now);
        nodes.values().map(|reg| reg.info.clone()).collect()
    }
}

/// Folds a directory snapshot into the aggregate view handed back to
/// operators.
pub fn summarize(nodes: Vec<NodeInfo>) -> ClusterStatus {
    let total_connections = nodes.iter().map(|n| n.connections).sum();
    let mut regions: Vec<String> = nodes.iter().map(|n| n.region.clone()).collect();
    regions.sort();
    regions.dedup();
    ClusterStatus { total_nodes: nodes.len(), total_connections, regions, nodes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reflects_registered_nodes() {
        let directory = LocalDirectory::new();
        directory
            .register(
                NodeInfo { node_id: "a".into(), region: "us-east".into(), connections: 3, last_update: Instant::now() },
                Duration::from_secs(120),
            )
            .await;
        directory
            .register(
                NodeInfo { node_id: "b".into(), region: "eu-west".into(), connections: 2, last_update: Instant::now() },
                Duration::from_secs(120),
            )
            .await;

        let status = summarize(directory.snapshot().await);
        assert_eq!(status.total_nodes, 2);
        assert_eq!(status.total_connections, 5);
        assert_eq!(status.regions, vec!["eu-west".to_string(), "us-east".to_string()]);
    }

    #[tokio::test]
    async fn expired_registration_is_dropped() {
        let directory = LocalDirectory::new();
        directory
            .register(
                NodeInfo { node_id: "a".into(), region: "us-east".into(), connections: 1, last_update: Instant::now() },
                Duration::from_millis(0),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(directory.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn unregister_removes_node() {
        let directory = LocalDirectory::new();
        directory
            .register(
                NodeInfo { node_id: "a".into(), region: "us-east".into(), connections: 1, last_update: Instant::now() },
                Duration::from_secs(60),
            )
            .await;
        directory.unregister("a").await;
        assert!(directory.snapshot().await.is_empty());
    }
}
