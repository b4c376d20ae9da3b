//! Dual-key response cache: exact fingerprint lookups plus optional semantic
//! similarity matching, with single-flight coalescing in front of both.
//!
//! This is the gateway-specific cache described in design §4.4 — `Cache`/
//! `SharedCacheLayer` remain generic Tower middleware for anything wrapping
//! one service; `ResponseCache` is the standalone component the pipeline
//! coordinator calls directly (it has no single inner `Service` to wrap,
//! since a cache hit must short-circuit the router and fallback executor
//! entirely).

use crate::eviction::EvictionPolicy;
use crate::single_flight::SingleFlightGroup;
pub use crate::single_flight::LeaderOutcome;
use crate::store::CacheStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Produces an embedding vector for a piece of text, used for semantic
/// similarity lookups.
///
/// Grounded in the original system's embedding-backed semantic cache; no
/// concrete embedding model ships here (design's Open Question decision:
/// this is a seam, not a vendored model). Callers supply an adapter over
/// whatever embedding backend they run.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns an embedding for `text`, or an empty vector if none could be
    /// produced (semantic lookups are skipped for that call).
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// An [`EmbeddingProvider`] that never produces embeddings, effectively
/// disabling semantic lookups. The default when no embedder is configured.
pub struct NoopEmbeddingProvider;

impl EmbeddingProvider for NoopEmbeddingProvider {
    fn embed(&self, _text: &str) -> Vec<f32> {
        Vec::new()
    }
}

/// Which lookup strategies the cache performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Fingerprint equality only.
    Exact,
    /// Embedding cosine similarity only.
    Semantic,
    /// Exact lookup first, falling back to semantic.
    Hybrid,
}

/// Configuration for [`ResponseCache`].
#[derive(Clone)]
pub struct ResponseCacheConfig {
    pub(crate) max_size: usize,
    pub(crate) ttl: Option<Duration>,
    pub(crate) eviction_policy: EvictionPolicy,
    pub(crate) mode: CacheMode,
    pub(crate) similarity_threshold: f32,
}

impl ResponseCacheConfig {
    pub fn builder() -> ResponseCacheConfigBuilder {
        ResponseCacheConfigBuilder::new()
    }
}

pub struct ResponseCacheConfigBuilder {
    max_size: usize,
    ttl: Option<Duration>,
    eviction_policy: EvictionPolicy,
    mode: CacheMode,
    similarity_threshold: f32,
}

impl ResponseCacheConfigBuilder {
    pub fn new() -> Self {
        Self {
            max_size: 10_000,
            ttl: Some(Duration::from_secs(3600)),
            eviction_policy: EvictionPolicy::Lru,
            mode: CacheMode::Hybrid,
            similarity_threshold: 0.95,
        }
    }

    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Minimum cosine similarity for a semantic hit. Default 0.95.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn build(self) -> ResponseCacheConfig {
        ResponseCacheConfig {
            max_size: self.max_size,
            ttl: self.ttl,
            eviction_policy: self.eviction_policy,
            mode: self.mode,
            similarity_threshold: self.similarity_threshold,
        }
    }
}

impl Default for ResponseCacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct SemanticEntry<Resp> {
    embedding: Vec<f32>,
    response: Resp,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

/// The gateway's response cache: exact fingerprint lookups, optional
/// semantic similarity matching, and single-flight coalescing across both.
pub struct ResponseCache<Resp> {
    config: ResponseCacheConfig,
    exact: Mutex<CacheStore<String, Resp>>,
    semantic: Mutex<Vec<SemanticEntry<Resp>>>,
    embedder: Arc<dyn EmbeddingProvider>,
    inflight: SingleFlightGroup<String, Resp>,
}

impl<Resp> ResponseCache<Resp>
where
    Resp: Clone + Send + 'static,
{
    pub fn new(config: ResponseCacheConfig, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let exact = CacheStore::new(config.max_size, config.ttl, config.eviction_policy);
        Self {
            config,
            exact: Mutex::new(exact),
            semantic: Mutex::new(Vec::new()),
            embedder,
            inflight: SingleFlightGroup::new(),
        }
    }

    /// Looks up `fingerprint` by exact match, then (if the mode allows and
    /// `query_text` is given) by semantic similarity.
    pub fn get(&self, fingerprint: &str, query_text: Option<&str>) -> Option<Resp> {
        if matches!(self.config.mode, CacheMode::Exact | CacheMode::Hybrid) {
            if let Some(hit) = self.exact.lock().unwrap().get(&fingerprint.to_string()) {
                return Some(hit);
            }
        }

        if matches!(self.config.mode, CacheMode::Semantic | CacheMode::Hybrid) {
            if let Some(text) = query_text {
                return self.get_semantic(text);
            }
        }

        None
    }

    fn get_semantic(&self, query_text: &str) -> Option<Resp> {
        let query_embedding = self.embedder.embed(query_text);
        if query_embedding.is_empty() {
            return None;
        }

        let semantic = self.semantic.lock().unwrap();
        semantic
            .iter()
            .filter_map(|entry| {
                cosine_similarity(&query_embedding, &entry.embedding).map(|sim| (sim, entry))
            })
            .filter(|(sim, _)| *sim >= self.config.similarity_threshold)
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap())
            .map(|(_, entry)| entry.response.clone())
    }

    /// Stores a response under both keys the configured mode uses.
    pub fn insert(&self, fingerprint: &str, query_text: Option<&str>, response: Resp) {
        if matches!(self.config.mode, CacheMode::Exact | CacheMode::Hybrid) {
            self.exact
                .lock()
                .unwrap()
                .insert(fingerprint.to_string(), response.clone());
        }

        if matches!(self.config.mode, CacheMode::Semantic | CacheMode::Hybrid) {
            if let Some(text) = query_text {
                let embedding = self.embedder.embed(text);
                if !embedding.is_empty() {
                    let mut semantic = self.semantic.lock().unwrap();
                    if semantic.len() >= self.config.max_size {
                        semantic.remove(0);
                    }
                    semantic.push(SemanticEntry { embedding, response });
                }
            }
        }
    }

    /// Tries to become the leader for `fingerprint`'s backend call. `None`
    /// means the caller must execute the call and report the outcome via
    /// [`ResponseCache::finish_lead`]; `Some(receiver)` means another caller
    /// is already in flight for the same fingerprint.
    pub fn try_lead(&self, fingerprint: &str) -> Option<broadcast::Receiver<LeaderOutcome<Resp>>> {
        self.inflight.try_lead(fingerprint.to_string())
    }

    /// Reports a leader's outcome and releases waiters. Does not itself
    /// populate the cache; call [`ResponseCache::insert`] separately on
    /// success.
    pub fn finish_lead(&self, fingerprint: &str, outcome: LeaderOutcome<Resp>) {
        self.inflight.finish(&fingerprint.to_string(), outcome);
    }

    /// Releases waiters for a leader that never completed (deadline expired,
    /// connection dropped).
    pub fn abandon_lead(&self, fingerprint: &str) {
        self.inflight.abandon(&fingerprint.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEmbedder;
    impl EmbeddingProvider for FakeEmbedder {
        fn embed(&self, text: &str) -> Vec<f32> {
            match text {
                "what is the capital of france" => vec![1.0, 0.0, 0.0],
                "what's the capital of france" => vec![0.99, 0.01, 0.0],
                "what is the weather today" => vec![0.0, 1.0, 0.0],
                _ => vec![],
            }
        }
    }

    fn cache() -> ResponseCache<String> {
        let config = ResponseCacheConfig::builder()
            .mode(CacheMode::Hybrid)
            .similarity_threshold(0.9)
            .build();
        ResponseCache::new(config, Arc::new(FakeEmbedder))
    }

    #[test]
    fn exact_hit_short_circuits_semantic() {
        let cache = cache();
        cache.insert("fp1", Some("what is the capital of france"), "Paris".to_string());
        assert_eq!(
            cache.get("fp1", Some("irrelevant")),
            Some("Paris".to_string())
        );
    }

    #[test]
    fn semantic_hit_on_near_paraphrase() {
        let cache = cache();
        cache.insert(
            "fp1",
            Some("what is the capital of france"),
            "Paris".to_string(),
        );
        assert_eq!(
            cache.get("different-fingerprint", Some("what's the capital of france")),
            Some("Paris".to_string())
        );
    }

    #[test]
    fn dissimilar_query_misses() {
        let cache = cache();
        cache.insert(
            "fp1",
            Some("what is the capital of france"),
            "Paris".to_string(),
        );
        assert_eq!(
            cache.get("fp2", Some("what is the weather today")),
            None
        );
    }

    #[test]
    fn exact_only_mode_ignores_semantic() {
        let config = ResponseCacheConfig::builder().mode(CacheMode::Exact).build();
        let cache = ResponseCache::new(config, Arc::new(FakeEmbedder));
        cache.insert("fp1", Some("what is the capital of france"), "Paris".to_string());
        assert_eq!(
            cache.get("fp2", Some("what's the capital of france")),
            None
        );
    }

    #[tokio::test]
    async fn single_flight_joins_and_releases() {
        let cache = cache();
        assert!(cache.try_lead("fp1").is_none());

        let mut waiter = cache.try_lead("fp1").unwrap();
        cache.insert("fp1", Some("what is the capital of france"), "Paris".to_string());
        cache.finish_lead("fp1", LeaderOutcome::Stored("Paris".to_string()));

        match waiter.recv().await.unwrap() {
            LeaderOutcome::Stored(v) => assert_eq!(v, "Paris"),
            LeaderOutcome::Failed => panic!("expected Stored"),
        }
    }
}
