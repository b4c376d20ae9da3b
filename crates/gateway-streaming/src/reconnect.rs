//! Reconnection support: a disconnected client that was handed a reconnect
//! token can reattach within the configured window and pick up its session
//! (and a capped backlog of messages it missed) under a fresh connection
//! id. The token is opaque and unrelated to the connection id it stands in
//! for, so a leaked connection id alone can't be used to hijack a session.

use crate::error::StreamError;
use crate::registry::ConnectionRegistry;
use crate::types::{ConnectionId, Message};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

const MAX_MISSED_MESSAGES: usize = 100;

struct PendingSession {
    connection_id: ConnectionId,
    user_id: String,
    tenant_id: String,
    session_id: String,
    expires_at: Instant,
    missed_messages: VecDeque<Message>,
}

/// Outcome of a successful [`reconnect`]: a fresh connection plus the
/// backlog of messages the client missed while it was away, in order.
pub struct Reconnected {
    pub connection_id: ConnectionId,
    pub outbound: tokio::sync::mpsc::Receiver<Message>,
    pub replayed: usize,
}

/// Holds session state for connections eligible to reconnect, keyed by an
/// unguessable token rather than the connection id.
pub struct ReconnectStore {
    window: Duration,
    pending: Mutex<HashMap<String, PendingSession>>,
}

impl ReconnectStore {
    pub fn new(window: Duration) -> Self {
        Self { window, pending: Mutex::new(HashMap::new()) }
    }

    /// Issues a reconnect token for a connection that just disconnected,
    /// valid for this store's window.
    pub fn enable(&self, connection_id: ConnectionId, user_id: &str, tenant_id: &str, session_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.pending.lock().unwrap().insert(
            token.clone(),
            PendingSession {
                connection_id,
                user_id: user_id.to_string(),
                tenant_id: tenant_id.to_string(),
                session_id: session_id.to_string(),
                expires_at: Instant::now() + self.window,
                missed_messages: VecDeque::new(),
            },
        );
        token
    }

    /// Buffers a message that arrived for a connection while it was
    /// disconnected but still within its reconnect window, capped to avoid
    /// unbounded growth from a client that never comes back.
    pub fn buffer_missed(&self, token: &str, message: Message) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(session) = pending.get_mut(token) {
            if session.missed_messages.len() >= MAX_MISSED_MESSAGES {
                session.missed_messages.pop_front();
            }
            session.missed_messages.push_back(message);
        }
    }

    /// Redeems a token, returning the original connection id, the held
    /// tenant/session id, and any buffered messages. Fails closed: an
    /// unknown or expired token, or a user mismatch, is always an error so
    /// the caller treats it as a fresh `connecting` attempt instead.
    fn redeem(&self, token: &str, user_id: &str) -> Result<(ConnectionId, String, String, Vec<Message>), StreamError> {
        let mut pending = self.pending.lock().unwrap();
        let session = pending.get(token).ok_or(StreamError::UnknownReconnectToken)?;

        if Instant::now() > session.expires_at {
            pending.remove(token);
            return Err(StreamError::UnknownReconnectToken);
        }
        if session.user_id != user_id {
            return Err(StreamError::ReconnectUserMismatch);
        }

        let session = pending.remove(token).unwrap();
        Ok((session.connection_id, session.tenant_id, session.session_id, session.missed_messages.into_iter().collect()))
    }

    /// Drops tokens past their window, for periodic cleanup alongside the
    /// heartbeat/index sweeps.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.pending.lock().unwrap().retain(|_, session| session.expires_at > now);
    }
}

/// Redeems a reconnect token against `store`, opens a fresh connection on
/// `registry` with the recovered tenant/session, replays the buffered
/// backlog onto it, and emits a `Reconnected` event tying the old and new
/// connection ids together.
pub async fn reconnect(
    registry: &Arc<ConnectionRegistry>,
    store: &ReconnectStore,
    token: &str,
    user_id: &str,
) -> Result<Reconnected, StreamError> {
    let (old_connection_id, tenant_id, session_id, missed) = store.redeem(token, user_id)?;
    let (new_connection_id, outbound) = registry.connect(tenant_id, user_id, session_id).await?;

    let replayed = missed.len();
    for message in missed {
        let _ = registry.send_message(new_connection_id, message).await;
    }

    registry.emit_reconnected(old_connection_id, new_connection_id);

    Ok(Reconnected { connection_id: new_connection_id, outbound, replayed })
}
