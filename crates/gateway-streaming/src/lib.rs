//! Fan-out layer for the LLM gateway: connection lifecycle, heartbeats,
//! backpressure, reconnection and cross-node pub/sub for both SSE and
//! bidirectional socket streams.
//!
//! [`ConnectionRegistry`] owns the per-node connection indices and talks to
//! the cluster through two seams the gateway treats as external
//! collaborators: [`bus::PubSubBus`] (message fan-out, e.g. Redis) and
//! [`cluster::NodeDirectory`] (node membership). [`sse`] holds the framing,
//! chunking, compression and pacing helpers the pipeline coordinator calls
//! around its own chunk loop. [`ReconnectStore`] lets a dropped connection
//! reattach within its window without losing messages sent while it was
//! away.
//!
//! ```rust
//! use gateway_streaming::{ConnectionRegistry, StreamingConfig};
//! use gateway_streaming::bus::LocalBus;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let registry = Arc::new(ConnectionRegistry::new("node-a", StreamingConfig::default(), Arc::new(LocalBus::new())));
//! let (conn_id, mut outbound) = registry.connect("acme", "user-1", "session-1").await.unwrap();
//! registry.disconnect(conn_id, "client closed").await.unwrap();
//! # let _ = outbound.try_recv();
//! # }
//! ```

pub mod bus;
pub mod cluster;
mod config;
mod error;
mod events;
mod lifecycle;
mod reconnect;
mod registry;
pub mod sse;
mod types;

pub use config::StreamingConfig;
pub use error::StreamError;
pub use events::StreamEvent;
pub use lifecycle::{spawn_cleanup_loop, spawn_heartbeat_loop};
pub use reconnect::{Reconnected, ReconnectStore, reconnect};
pub use registry::{ConnectionRegistry, Presence};
pub use types::{Connection, ConnectionId, ConnectionState, Message, MessageType};
