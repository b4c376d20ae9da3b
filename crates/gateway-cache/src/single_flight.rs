//! Single-flight coalescing for the response cache.
//!
//! The cache guarantees at-most-one concurrent backend call per fingerprint
//! (design §4.4): the first probe for a key becomes the leader and executes
//! the real call, while concurrent probes for the same key subscribe to its
//! result instead of issuing their own. This mirrors the teacher's
//! `tower-resilience-coalesce` `InFlight` map, generalized here to key off
//! the cache's fingerprint rather than a Tower request.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// What happened to a leader's in-flight call.
#[derive(Debug, Clone)]
pub enum LeaderOutcome<V> {
    /// The leader stored a value; waiters receive a clone of it.
    Stored(V),
    /// The leader's attempt failed; waiters proceed to their own backend call.
    Failed,
}

/// Tracks in-flight lookups so concurrent callers with the same key share one
/// backend call.
pub struct SingleFlightGroup<K, V> {
    inflight: Mutex<HashMap<K, broadcast::Sender<LeaderOutcome<V>>>>,
}

impl<K, V> SingleFlightGroup<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to become the leader for `key`. Returns `None` if no call is
    /// in flight (caller must now execute the backend call and report the
    /// outcome via [`SingleFlightGroup::finish`]), or `Some(receiver)` to
    /// await the existing leader's outcome.
    pub fn try_lead(&self, key: K) -> Option<broadcast::Receiver<LeaderOutcome<V>>> {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(sender) = inflight.get(&key) {
            return Some(sender.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        inflight.insert(key, tx);
        None
    }

    /// Reports the leader's outcome and releases all waiters.
    pub fn finish(&self, key: &K, outcome: LeaderOutcome<V>) {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(sender) = inflight.remove(key) {
            let _ = sender.send(outcome);
        }
    }

    /// Releases waiters without a value, for leader cancellation (the
    /// request deadline expired or the connection dropped before the
    /// backend responded).
    pub fn abandon(&self, key: &K) {
        self.finish(key, LeaderOutcome::Failed);
    }
}

impl<K, V> Default for SingleFlightGroup<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
