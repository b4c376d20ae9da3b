//! Wire types for the fan-out layer: connections, messages, and the
//! handful of enums that describe their lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;

/// Frame kinds carried over a connection. Mirrors the discriminator on the
/// JSON pub/sub frame, not just in-process traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Heartbeat,
    Presence,
    System,
    Error,
    Subscribe,
    Unsubscribe,
    Ack,
}

/// Lifecycle state of a single connection. A connection belongs to at most
/// one node at a time; once `Disconnected`, no further frames are delivered
/// under that id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// A single id tying a connection to a client. Opaque outside this crate.
pub type ConnectionId = Uuid;

/// A frame addressed to, or originating from, a connection. Also the shape
/// published on the pub/sub bus for cross-node fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: serde_json::Value,
    pub sender_id: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub node_id: String,
}

impl Message {
    pub fn new(message_type: MessageType, content: impl Into<serde_json::Value>, node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            content: content.into(),
            sender_id: None,
            timestamp: 0,
            metadata: HashMap::new(),
            node_id: node_id.into(),
        }
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A connected client, tracked by the registry. Carries just enough
/// identity to route broadcasts and enforce per-user connection caps.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: String,
    pub node_id: String,
    pub state: ConnectionState,
    pub last_heartbeat: Instant,
    pub subscribed_channels: HashSet<String>,
    pub metadata: HashMap<String, String>,
}

impl Connection {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>, session_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            node_id: node_id.into(),
            state: ConnectionState::Connecting,
            last_heartbeat: Instant::now(),
            subscribed_channels: HashSet::new(),
            metadata: HashMap::new(),
        }
    }

    /// Default subscription set for a freshly connected client: its own
    /// user, session, tenant and node channels.
    pub fn default_channels(&self) -> Vec<String> {
        vec![
            format!("user:{}", self.user_id),
            format!("session:{}", self.session_id),
            format!("tenant:{}", self.tenant_id),
            format!("node:{}", self.node_id),
        ]
    }
}
