//! Per-tenant idempotency replay cache.
//!
//! Keyed by `(tenant_id, idempotency_key)` rather than a bare key: two
//! tenants picking the same client-chosen key must not collide, and the
//! coordinator only ever looks a key up scoped to the caller's own tenant.

use crate::types::ResponseEnvelope;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    response: ResponseEnvelope,
    expires_at: Instant,
}

pub struct IdempotencyStore {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the stored response for `(tenant_id, key)` if present and not
    /// yet expired, evicting it on read if it has.
    pub fn get(&self, tenant_id: &str, key: &str) -> Option<ResponseEnvelope> {
        let mut entries = self.entries.lock().unwrap();
        let lookup = (tenant_id.to_string(), key.to_string());
        match entries.get(&lookup) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(&lookup);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, tenant_id: &str, key: &str, response: ResponseEnvelope) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.lock().unwrap().insert(
            (tenant_id.to_string(), key.to_string()),
            Entry { response, expires_at },
        );
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(86_400))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_provider::{CompletionResponse, TokenUsage};

    fn response() -> ResponseEnvelope {
        let completion = CompletionResponse {
            content: "hi".into(),
            model: "gpt-4".into(),
            provider: "openai".into(),
            usage: TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
                prompt_cost: 0.0,
                completion_cost: 0.0,
            },
            latency_ms: 1.0,
            cached: false,
            finish_reason: Some("stop".into()),
        };
        ResponseEnvelope::from_completion("r1", &completion, false)
    }

    #[test]
    fn stores_and_replays_within_ttl() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        store.insert("tenant-a", "req-1", response());
        assert!(store.get("tenant-a", "req-1").is_some());
    }

    #[test]
    fn same_key_different_tenant_misses() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        store.insert("tenant-a", "req-1", response());
        assert!(store.get("tenant-b", "req-1").is_none());
    }

    #[test]
    fn unknown_key_misses() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert!(store.get("tenant-a", "absent").is_none());
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let store = IdempotencyStore::new(Duration::from_millis(0));
        store.insert("tenant-a", "req-1", response());
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get("tenant-a", "req-1").is_none());
    }
}
