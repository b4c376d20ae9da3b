//! Cross-node pub/sub. The gateway treats this as an external collaborator
//! (a distributed cache/bus) — [`PubSubBus`] is the seam a deployment wires
//! to Redis, NATS, or whatever it already runs. [`LocalBus`] is the
//! in-process default: correct for a single node, and useful in tests.

use crate::types::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Publishes and subscribes to named channels carrying [`Message`] frames.
/// Channel names follow `{scope}:{id}` (`user:42`, `tenant:acme`, ...).
/// Delivery is fire-and-forget; the bus is not required to be durable.
#[async_trait]
pub trait PubSubBus: Send + Sync {
    async fn publish(&self, channel: &str, message: Message);

    /// Subscribes to a channel, returning a receiver of future messages.
    /// Implementations may create the channel lazily.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Message>;
}

/// Single-node pub/sub backed by one `tokio::sync::broadcast` channel per
/// topic. Messages published before any subscriber exists are dropped,
/// matching the bus's fire-and-forget contract.
pub struct LocalBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Message>>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: 256,
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Message> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubBus for LocalBus {
    async fn publish(&self, channel: &str, message: Message) {
        // No subscribers is not an error: fire-and-forget.
        let _ = self.sender_for(channel).send(message);
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Message> {
        self.sender_for(channel).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("user:42");
        bus.publish("user:42", Message::new(MessageType::Text, "hi", "node-a")).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.content, "hi");
    }

    #[tokio::test]
    async fn publish_with_no_subscriber_does_not_panic() {
        let bus = LocalBus::new();
        bus.publish("session:1", Message::new(MessageType::Text, "hi", "node-a")).await;
    }

    #[tokio::test]
    async fn each_channel_is_independent() {
        let bus = LocalBus::new();
        let mut user_rx = bus.subscribe("user:1");
        bus.publish("tenant:acme", Message::new(MessageType::Text, "hi", "node-a")).await;
        assert!(user_rx.try_recv().is_err());
    }
}
