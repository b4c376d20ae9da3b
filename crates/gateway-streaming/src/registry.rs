//! Connection registry: indices by user/session, channel subscription
//! ref-counting, presence, and the local/cross-node delivery split.
//! Indices are updated under a short critical section (a `Mutex` per
//! index); per-connection delivery goes over a `tokio::sync::mpsc` queue
//! so the registry never blocks on a slow client.

use crate::bus::PubSubBus;
use crate::config::StreamingConfig;
use crate::error::StreamError;
use crate::events::StreamEvent;
use crate::types::{Connection, ConnectionId, ConnectionState, Message, MessageType};
use gateway_core::events::EventListeners;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Entry {
    connection: Connection,
    sender: mpsc::Sender<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
}

/// Tracks every connection live on this node, fans messages out to them,
/// and relays matching pub/sub traffic from sibling nodes.
pub struct ConnectionRegistry {
    node_id: String,
    config: StreamingConfig,
    bus: Arc<dyn PubSubBus>,
    connections: Mutex<HashMap<ConnectionId, Entry>>,
    user_index: Mutex<HashMap<String, HashSet<ConnectionId>>>,
    session_index: Mutex<HashMap<String, HashSet<ConnectionId>>>,
    channel_subscribers: Mutex<HashMap<String, HashSet<ConnectionId>>>,
    relay_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    presence: Mutex<HashMap<String, Presence>>,
    event_listeners: EventListeners<StreamEvent>,
}

impl ConnectionRegistry {
    /// Builds a fresh registry. Wrap the result in `Arc::new` before calling
    /// [`ConnectionRegistry::connect`] — connection bookkeeping needs to
    /// hand a shared handle to its spawned relay tasks. Add event listeners
    /// with [`ConnectionRegistry::on_event`] beforehand, while you still
    /// have exclusive access.
    pub fn new(node_id: impl Into<String>, config: StreamingConfig, bus: Arc<dyn PubSubBus>) -> Self {
        Self {
            node_id: node_id.into(),
            config,
            bus,
            connections: Mutex::new(HashMap::new()),
            user_index: Mutex::new(HashMap::new()),
            session_index: Mutex::new(HashMap::new()),
            channel_subscribers: Mutex::new(HashMap::new()),
            relay_tasks: Mutex::new(HashMap::new()),
            presence: Mutex::new(HashMap::new()),
            event_listeners: EventListeners::new(),
        }
    }

    pub fn on_event<L>(&mut self, listener: L)
    where
        L: gateway_core::events::EventListener<StreamEvent> + 'static,
    {
        self.event_listeners.add(listener);
    }

    fn emit(&self, event: StreamEvent) {
        self.event_listeners.emit(&event);
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Admits a new connection: enforces the per-user cap, wires its
    /// outbound queue, subscribes to its default channels, and marks it
    /// online.
    pub async fn connect(
        self: &Arc<Self>,
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<(ConnectionId, mpsc::Receiver<Message>), StreamError> {
        let tenant_id = tenant_id.into();
        let user_id = user_id.into();
        let session_id = session_id.into();

        {
            let user_index = self.user_index.lock().unwrap();
            let current = user_index.get(&user_id).map(|set| set.len()).unwrap_or(0);
            if current >= self.config.max_connections_per_user {
                return Err(StreamError::ConnectionLimitExceeded {
                    user_id,
                    limit: self.config.max_connections_per_user,
                });
            }
        }

        let mut connection = Connection::new(tenant_id, user_id.clone(), session_id.clone(), self.node_id.clone());
        let (sender, receiver) = mpsc::channel(self.config.outbound_queue_capacity);
        let conn_id = connection.id;
        connection.state = ConnectionState::Connected;

        for channel in connection.default_channels() {
            connection.subscribed_channels.insert(channel.clone());
            self.subscribe_channel(conn_id, &channel);
        }

        self.connections.lock().unwrap().insert(conn_id, Entry { connection, sender });
        self.user_index.lock().unwrap().entry(user_id.clone()).or_default().insert(conn_id);
        self.session_index.lock().unwrap().entry(session_id).or_default().insert(conn_id);

        self.set_presence(&user_id, Presence::Online).await;
        self.emit(StreamEvent::Connected {
            pattern_name: self.node_id.clone(),
            timestamp: Instant::now(),
            connection_id: conn_id.to_string(),
            user_id,
        });

        Ok((conn_id, receiver))
    }

    /// Removes a connection from every index and unsubscribes it from its
    /// channels, returning its identity so the caller can, e.g., issue a
    /// reconnect token for it. Presence flips to offline only once the user
    /// has no other connections left on this node.
    pub async fn disconnect(&self, conn_id: ConnectionId, reason: &str) -> Result<Connection, StreamError> {
        let entry = self
            .connections
            .lock()
            .unwrap()
            .remove(&conn_id)
            .ok_or_else(|| StreamError::UnknownConnection(conn_id.to_string()))?;

        let channels: Vec<String> = entry.connection.subscribed_channels.iter().cloned().collect();
        for channel in channels {
            self.unsubscribe_channel(conn_id, &channel);
        }

        let user_id = entry.connection.user_id.clone();
        let mut user_index = self.user_index.lock().unwrap();
        if let Some(set) = user_index.get_mut(&user_id) {
            set.remove(&conn_id);
            let now_empty = set.is_empty();
            if now_empty {
                user_index.remove(&user_id);
            }
            drop(user_index);
            if now_empty {
                self.set_presence(&user_id, Presence::Offline).await;
            }
        }

        let mut session_index = self.session_index.lock().unwrap();
        if let Some(set) = session_index.get_mut(&entry.connection.session_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                session_index.remove(&entry.connection.session_id);
            }
        }

        self.emit(StreamEvent::Disconnected {
            pattern_name: self.node_id.clone(),
            timestamp: Instant::now(),
            connection_id: conn_id.to_string(),
            reason: reason.to_string(),
        });

        Ok(entry.connection)
    }

    /// Emits a `HeartbeatTimeout` event ahead of the `disconnect` call the
    /// heartbeat loop makes for the same connection, so listeners can tell
    /// a timed-out client apart from a clean disconnect.
    pub fn mark_heartbeat_timeout(&self, conn_id: ConnectionId) {
        self.emit(StreamEvent::HeartbeatTimeout {
            pattern_name: self.node_id.clone(),
            timestamp: Instant::now(),
            connection_id: conn_id.to_string(),
        });
    }

    /// Reference-counted channel subscription: the first local subscriber
    /// to a channel spawns a relay task from the bus; the last one to leave
    /// tears it down.
    fn subscribe_channel(self: &Arc<Self>, conn_id: ConnectionId, channel: &str) {
        let mut subscribers = self.channel_subscribers.lock().unwrap();
        let is_new_channel = !subscribers.contains_key(channel);
        subscribers.entry(channel.to_string()).or_default().insert(conn_id);
        drop(subscribers);

        if is_new_channel {
            let mut receiver = self.bus.subscribe(channel);
            let registry = Arc::clone(self);
            let channel_owned = channel.to_string();
            let handle = tokio::spawn(async move {
                while let Ok(message) = receiver.recv().await {
                    if message.node_id == registry.node_id {
                        continue;
                    }
                    registry.deliver_to_channel(&channel_owned, message).await;
                }
            });
            self.relay_tasks.lock().unwrap().insert(channel.to_string(), handle);
        }
    }

    fn unsubscribe_channel(&self, conn_id: ConnectionId, channel: &str) {
        let mut subscribers = self.channel_subscribers.lock().unwrap();
        let Some(set) = subscribers.get_mut(channel) else { return };
        set.remove(&conn_id);
        let now_empty = set.is_empty();
        if now_empty {
            subscribers.remove(channel);
        }
        drop(subscribers);

        if now_empty {
            if let Some(handle) = self.relay_tasks.lock().unwrap().remove(channel) {
                handle.abort();
            }
        }
    }

    async fn deliver_to_channel(&self, channel: &str, message: Message) {
        let conn_ids: Vec<ConnectionId> = self
            .channel_subscribers
            .lock()
            .unwrap()
            .get(channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for conn_id in conn_ids {
            let _ = self.deliver_local(conn_id, message.clone()).await;
        }
    }

    /// Enforces the size limit and the overflow policy: heartbeats and
    /// presence frames are dropped when the queue is full, everything else
    /// applies backpressure to the producer.
    async fn deliver_local(&self, conn_id: ConnectionId, message: Message) -> Result<(), StreamError> {
        let encoded_size = serde_json::to_vec(&message).map(|bytes| bytes.len()).unwrap_or(0);
        if encoded_size > self.config.max_message_size_bytes {
            return Err(StreamError::MessageTooLarge {
                size: encoded_size,
                limit: self.config.max_message_size_bytes,
            });
        }

        let sender = {
            let connections = self.connections.lock().unwrap();
            match connections.get(&conn_id) {
                Some(entry) => entry.sender.clone(),
                None => return Err(StreamError::UnknownConnection(conn_id.to_string())),
            }
        };

        let critical = matches!(message.message_type, MessageType::Heartbeat | MessageType::Presence);
        if critical {
            if sender.try_send(message).is_err() {
                self.emit(StreamEvent::MessageDropped {
                    pattern_name: self.node_id.clone(),
                    timestamp: Instant::now(),
                    connection_id: conn_id.to_string(),
                    reason: "outbound queue full",
                });
            }
        } else if sender.send(message).await.is_err() {
            return Err(StreamError::AlreadyDisconnected(conn_id.to_string()));
        }

        Ok(())
    }

    pub async fn send_message(&self, conn_id: ConnectionId, message: Message) -> Result<(), StreamError> {
        self.deliver_local(conn_id, message).await
    }

    async fn publish_and_deliver(&self, channel: String, message: Message) {
        let mut stamped = message;
        stamped.node_id = self.node_id.clone();
        self.deliver_to_channel(&channel, stamped.clone()).await;
        self.bus.publish(&channel, stamped).await;
    }

    pub async fn broadcast_to_user(&self, user_id: &str, message: Message) {
        self.publish_and_deliver(format!("user:{user_id}"), message).await;
    }

    pub async fn broadcast_to_session(&self, session_id: &str, message: Message) {
        self.publish_and_deliver(format!("session:{session_id}"), message).await;
    }

    pub async fn broadcast_to_tenant(&self, tenant_id: &str, message: Message) {
        self.publish_and_deliver(format!("tenant:{tenant_id}"), message).await;
    }

    /// Acknowledges a heartbeat from the client, refreshing its liveness
    /// timestamp so the heartbeat loop doesn't treat it as dead.
    pub fn record_heartbeat(&self, conn_id: ConnectionId) -> Result<(), StreamError> {
        let mut connections = self.connections.lock().unwrap();
        let entry = connections.get_mut(&conn_id).ok_or_else(|| StreamError::UnknownConnection(conn_id.to_string()))?;
        entry.connection.last_heartbeat = Instant::now();
        Ok(())
    }

    async fn set_presence(&self, user_id: &str, presence: Presence) {
        self.presence.lock().unwrap().insert(user_id.to_string(), presence);
        let status = match presence {
            Presence::Online => "online",
            Presence::Offline => "offline",
        };
        let message = Message::new(MessageType::Presence, serde_json::json!({ "user_id": user_id, "status": status }), self.node_id.clone());
        self.publish_and_deliver(format!("presence:{user_id}"), message).await;
    }

    pub fn presence(&self, user_id: &str) -> Option<Presence> {
        self.presence.lock().unwrap().get(user_id).copied()
    }

    /// `(tenant_id, user_id, session_id)` for a still-live connection, for
    /// callers (like [`crate::reconnect::ReconnectStore::enable`]) that
    /// need its identity before tearing it down.
    pub fn connection_identity(&self, conn_id: ConnectionId) -> Option<(String, String, String)> {
        let connections = self.connections.lock().unwrap();
        connections.get(&conn_id).map(|entry| {
            (entry.connection.tenant_id.clone(), entry.connection.user_id.clone(), entry.connection.session_id.clone())
        })
    }

    /// Emits a `Reconnected` event tying a redeemed reconnect token's old
    /// connection id to the fresh one it was reattached under. Called by
    /// [`crate::reconnect::reconnect`] once the new connection is live.
    pub fn emit_reconnected(&self, old_connection_id: ConnectionId, new_connection_id: ConnectionId) {
        self.emit(StreamEvent::Reconnected {
            pattern_name: self.node_id.clone(),
            timestamp: Instant::now(),
            old_connection_id: old_connection_id.to_string(),
            new_connection_id: new_connection_id.to_string(),
        });
    }

    /// Connections whose last heartbeat is older than `timeout`, to be
    /// disconnected by the heartbeat loop; connections older than
    /// `interval` but within `timeout` are due a ping.
    pub fn heartbeat_sweep(&self, interval: std::time::Duration, timeout: std::time::Duration) -> (Vec<ConnectionId>, Vec<ConnectionId>) {
        let now = Instant::now();
        let connections = self.connections.lock().unwrap();
        let mut due_for_ping = Vec::new();
        let mut dead = Vec::new();
        for (id, entry) in connections.iter() {
            let elapsed = now.duration_since(entry.connection.last_heartbeat);
            if elapsed > timeout {
                dead.push(*id);
            } else if elapsed > interval {
                due_for_ping.push(*id);
            }
        }
        (due_for_ping, dead)
    }

    /// Clears index entries left empty by connections that disappeared
    /// without a clean `disconnect` call.
    pub fn sweep_empty_indices(&self) {
        self.user_index.lock().unwrap().retain(|_, set| !set.is_empty());
        self.session_index.lock().unwrap().retain(|_, set| !set.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new("node-a", StreamingConfig::default(), Arc::new(LocalBus::new())))
    }

    #[tokio::test]
    async fn connect_registers_default_channels() {
        let registry = registry();
        let (conn_id, _rx) = registry.connect("acme", "u1", "s1").await.unwrap();
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.presence("u1"), Some(Presence::Online));
        registry.disconnect(conn_id, "test teardown").await.unwrap();
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn connection_cap_is_enforced() {
        let mut config = StreamingConfig::default();
        config.max_connections_per_user = 1;
        let registry = Arc::new(ConnectionRegistry::new("node-a", config, Arc::new(LocalBus::new())));
        registry.connect("acme", "u1", "s1").await.unwrap();
        let result = registry.connect("acme", "u1", "s2").await;
        assert!(matches!(result, Err(StreamError::ConnectionLimitExceeded { .. })));
    }

    #[tokio::test]
    async fn disconnect_clears_presence_once_last_connection_leaves() {
        let registry = registry();
        let (first, _rx1) = registry.connect("acme", "u1", "s1").await.unwrap();
        let (second, _rx2) = registry.connect("acme", "u1", "s2").await.unwrap();
        registry.disconnect(first, "bye").await.unwrap();
        assert_eq!(registry.presence("u1"), Some(Presence::Online));
        registry.disconnect(second, "bye").await.unwrap();
        assert_eq!(registry.presence("u1"), Some(Presence::Offline));
    }

    #[tokio::test]
    async fn broadcast_to_user_reaches_local_connection() {
        let registry = registry();
        let (_conn_id, mut rx) = registry.connect("acme", "u1", "s1").await.unwrap();
        registry.broadcast_to_user("u1", Message::new(MessageType::Text, "hi", "node-a")).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.content, "hi");
    }

    #[tokio::test]
    async fn heartbeat_sweep_flags_stale_connections() {
        let registry = registry();
        let (conn_id, _rx) = registry.connect("acme", "u1", "s1").await.unwrap();
        {
            let mut connections = registry.connections.lock().unwrap();
            connections.get_mut(&conn_id).unwrap().connection.last_heartbeat =
                Instant::now() - std::time::Duration::from_secs(120);
        }
        let (_due, dead) = registry.heartbeat_sweep(std::time::Duration::from_secs(30), std::time::Duration::from_secs(60));
        assert_eq!(dead, vec![conn_id]);
    }

    #[tokio::test]
    async fn unknown_connection_on_send_is_an_error() {
        let registry = registry();
        let bogus = uuid::Uuid::new_v4();
        let result = registry.send_message(bogus, Message::new(MessageType::Text, "hi", "node-a")).await;
        assert!(matches!(result, Err(StreamError::UnknownConnection(_))));
    }
}
