//! Tenant- and resource-keyed admission control (design §4.6).
//!
//! `RateLimiterLayer` wraps a single `Service`; this module is the thing the
//! pipeline coordinator calls directly before a provider is even selected,
//! keyed by `(tenant_id, resource)` rather than by service instance.
//! Grounded in `rate_limiter.py`'s `TenantRateLimiter` and its
//! `allow_request_for_tenant` dispatch: the resource family selects both the
//! limit value and the window unit (api_calls per-minute, tokens per-day).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Which algorithm backs a tenant's rate limit bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Continuous refill, burstable up to capacity.
    TokenBucket,
    /// Exact count of requests within a trailing window.
    SlidingWindow,
    /// Either of the above, evaluated through a [`RateLimitStore`] shared
    /// across nodes via compare-and-set.
    Distributed,
    /// Token bucket with effective capacity scaled down under load.
    Adaptive,
}

/// Which resource family a request consumes. Selects both the limit value
/// and its window unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceFamily {
    /// Request count, limited per minute.
    ApiCalls,
    /// Token count, limited per day.
    Tokens,
}

/// Subscription tier, used to look up default limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Free,
    Starter,
    Professional,
    Enterprise,
}

/// Limits attached to a tier (or a per-tenant override of one).
#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub requests_per_minute: u64,
    pub tokens_per_day: u64,
    pub concurrent_connections: u32,
}

/// The tier → limits lookup table.
pub struct TierDefaults {
    table: HashMap<Tier, TierLimits>,
}

impl TierDefaults {
    /// A reasonable default table; deployments are expected to override it.
    pub fn standard() -> Self {
        let mut table = HashMap::new();
        table.insert(
            Tier::Free,
            TierLimits {
                requests_per_minute: 10,
                tokens_per_day: 50_000,
                concurrent_connections: 1,
            },
        );
        table.insert(
            Tier::Starter,
            TierLimits {
                requests_per_minute: 60,
                tokens_per_day: 1_000_000,
                concurrent_connections: 5,
            },
        );
        table.insert(
            Tier::Professional,
            TierLimits {
                requests_per_minute: 600,
                tokens_per_day: 20_000_000,
                concurrent_connections: 25,
            },
        );
        table.insert(
            Tier::Enterprise,
            TierLimits {
                requests_per_minute: 6_000,
                tokens_per_day: 500_000_000,
                concurrent_connections: 200,
            },
        );
        Self { table }
    }

    pub fn for_tier(&self, tier: Tier) -> TierLimits {
        self.table[&tier]
    }

    pub fn set_tier(&mut self, tier: Tier, limits: TierLimits) {
        self.table.insert(tier, limits);
    }
}

impl Default for TierDefaults {
    fn default() -> Self {
        Self::standard()
    }
}

/// Point-in-time admission state for a `(tenant, resource)` key, surfaced as
/// `X-RateLimit-Limit`/`X-RateLimit-Remaining`/`X-RateLimit-Reset` response
/// headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Instant,
}

/// Persisted state of one rate-limit bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketState {
    TokenBucket {
        tokens: f64,
        last_refill: Instant,
    },
    SlidingWindow {
        timestamps: Vec<Instant>,
    },
}

/// Storage seam for bucket state.
///
/// The in-process [`InProcessStore`] backs single-node deployments.
/// `Algorithm::Distributed` is meant to run against an external cache that
/// offers the same compare-and-set semantics (design §5's "scripted
/// evaluation primitive"); no such client ships here, matching the
/// `EmbeddingProvider`-style trait-seam pattern used elsewhere for optional
/// external dependencies.
pub trait RateLimitStore: Send + Sync {
    fn load(&self, key: &str) -> Option<BucketState>;

    /// Replaces the bucket for `key` with `new`, succeeding only if the
    /// currently stored value equals `expected`. Returns `false` on
    /// contention; callers retry with freshly loaded state.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&BucketState>,
        new: BucketState,
    ) -> bool;
}

/// A single-process [`RateLimitStore`] behind a striped... actually a single
/// lock (striping is left to callers that shard the registry itself).
pub struct InProcessStore {
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl InProcessStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InProcessStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitStore for InProcessStore {
    fn load(&self, key: &str) -> Option<BucketState> {
        self.buckets.lock().unwrap().get(key).cloned()
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&BucketState>,
        new: BucketState,
    ) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.get(key) != expected {
            return false;
        }
        buckets.insert(key.to_string(), new);
        true
    }
}

/// Tenant- and resource-keyed rate limiter.
pub struct TenantRateLimiterRegistry {
    algorithm: Algorithm,
    tiers: TierDefaults,
    overrides: Mutex<HashMap<String, TierLimits>>,
    store: Arc<dyn RateLimitStore>,
    load_signal: Arc<dyn Fn() -> f64 + Send + Sync>,
}

impl TenantRateLimiterRegistry {
    pub fn new(algorithm: Algorithm, tiers: TierDefaults) -> Self {
        Self {
            algorithm,
            tiers,
            overrides: Mutex::new(HashMap::new()),
            store: Arc::new(InProcessStore::new()),
            load_signal: Arc::new(|| 0.0),
        }
    }

    /// Swaps in a distributed store. Only meaningful with
    /// `Algorithm::Distributed`.
    pub fn with_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = store;
        self
    }

    /// Supplies the system-load signal `Algorithm::Adaptive` scales capacity
    /// by (design §4.6: `f(0.8)=0.5`, `f(0.6)=0.75`, `f(·)=1` otherwise).
    pub fn with_load_signal<F>(mut self, f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.load_signal = Arc::new(f);
        self
    }

    /// Overrides a tenant's limits independent of its tier's defaults.
    pub fn set_tenant_override(&self, tenant_id: &str, limits: TierLimits) {
        self.overrides
            .lock()
            .unwrap()
            .insert(tenant_id.to_string(), limits);
    }

    fn limits_for(&self, tenant_id: &str, tier: Tier) -> TierLimits {
        self.overrides
            .lock()
            .unwrap()
            .get(tenant_id)
            .copied()
            .unwrap_or_else(|| self.tiers.for_tier(tier))
    }

    fn adaptive_factor(&self) -> f64 {
        let load = (self.load_signal)();
        if load >= 0.8 {
            0.5
        } else if load >= 0.6 {
            0.75
        } else {
            1.0
        }
    }

    fn key_for(tenant_id: &str, resource: ResourceFamily) -> String {
        format!("{tenant_id}:{resource:?}")
    }

    /// Resolves the effective `(limit, window)` for `(tenant_id, tier, resource)`,
    /// applying the adaptive-load scale-down when the registry's algorithm calls
    /// for it.
    fn limit_and_window(&self, tenant_id: &str, tier: Tier, resource: ResourceFamily) -> (u64, Duration) {
        let limits = self.limits_for(tenant_id, tier);
        let (base_limit, window) = match resource {
            ResourceFamily::ApiCalls => (limits.requests_per_minute, Duration::from_secs(60)),
            ResourceFamily::Tokens => (limits.tokens_per_day, Duration::from_secs(86_400)),
        };

        let limit = if matches!(self.algorithm, Algorithm::Adaptive) {
            ((base_limit as f64) * self.adaptive_factor()).max(1.0) as u64
        } else {
            base_limit
        };

        (limit, window)
    }

    /// Evaluates admission for one request costing `cost` units of
    /// `resource`. `bypass` admits unconditionally without touching the
    /// bucket (used for internal/admin calls). Returns `Err(retry_after)` on
    /// rejection.
    pub fn allow(
        &self,
        tenant_id: &str,
        tier: Tier,
        resource: ResourceFamily,
        cost: u64,
        bypass: bool,
    ) -> Result<(), Duration> {
        if bypass {
            return Ok(());
        }

        let (limit, window) = self.limit_and_window(tenant_id, tier, resource);
        let key = Self::key_for(tenant_id, resource);
        match self.algorithm {
            Algorithm::TokenBucket | Algorithm::Distributed | Algorithm::Adaptive => {
                self.allow_token_bucket(&key, limit, window, cost)
            }
            Algorithm::SlidingWindow => self.allow_sliding_window(&key, limit, window, cost),
        }
    }

    /// Reads `(limit, remaining, reset_at)` for `(tenant_id, tier, resource)`
    /// without consuming any capacity, for `X-RateLimit-*` response headers.
    pub fn headers(&self, tenant_id: &str, tier: Tier, resource: ResourceFamily) -> RateLimitHeaders {
        let (limit, window) = self.limit_and_window(tenant_id, tier, resource);
        let key = Self::key_for(tenant_id, resource);
        let now = Instant::now();

        match self.store.load(&key) {
            Some(BucketState::TokenBucket {
                tokens,
                last_refill,
            }) => {
                let refill_rate = limit as f64 / window.as_secs_f64();
                let elapsed = now.duration_since(last_refill).as_secs_f64();
                let refreshed = (tokens + elapsed * refill_rate).min(limit as f64);
                let remaining = refreshed.floor().max(0.0) as u64;
                let reset_at = if remaining >= limit {
                    now
                } else {
                    now + Duration::from_secs_f64((limit as f64 - refreshed) / refill_rate)
                };
                RateLimitHeaders {
                    limit,
                    remaining,
                    reset_at,
                }
            }
            Some(BucketState::SlidingWindow { timestamps }) => {
                let live: Vec<Instant> = timestamps
                    .into_iter()
                    .filter(|t| now.duration_since(*t) < window)
                    .collect();
                let remaining = limit.saturating_sub(live.len() as u64);
                let reset_at = live
                    .iter()
                    .min()
                    .map(|oldest| *oldest + window)
                    .unwrap_or(now);
                RateLimitHeaders {
                    limit,
                    remaining,
                    reset_at,
                }
            }
            None => RateLimitHeaders {
                limit,
                remaining: limit,
                reset_at: now,
            },
        }
    }

    /// Clears `(tenant_id, resource)`'s bucket back to full capacity,
    /// retrying under contention the same way `allow` does.
    pub fn reset(&self, tenant_id: &str, tier: Tier, resource: ResourceFamily) {
        let (limit, _window) = self.limit_and_window(tenant_id, tier, resource);
        let key = Self::key_for(tenant_id, resource);

        let fresh = match self.algorithm {
            Algorithm::SlidingWindow => BucketState::SlidingWindow {
                timestamps: Vec::new(),
            },
            Algorithm::TokenBucket | Algorithm::Distributed | Algorithm::Adaptive => {
                BucketState::TokenBucket {
                    tokens: limit as f64,
                    last_refill: Instant::now(),
                }
            }
        };

        loop {
            let current = self.store.load(&key);
            if self.store.compare_and_swap(&key, current.as_ref(), fresh.clone()) {
                return;
            }
        }
    }

    fn allow_token_bucket(
        &self,
        key: &str,
        capacity: u64,
        window: Duration,
        cost: u64,
    ) -> Result<(), Duration> {
        let refill_rate = capacity as f64 / window.as_secs_f64();

        loop {
            let now = Instant::now();
            let current = self.store.load(key);
            let (tokens, last_refill) = match &current {
                Some(BucketState::TokenBucket {
                    tokens,
                    last_refill,
                }) => (*tokens, *last_refill),
                _ => (capacity as f64, now),
            };

            let elapsed = now.duration_since(last_refill).as_secs_f64();
            let refreshed = (tokens + elapsed * refill_rate).min(capacity as f64);

            if refreshed >= cost as f64 {
                let new_state = BucketState::TokenBucket {
                    tokens: refreshed - cost as f64,
                    last_refill: now,
                };
                if self.store.compare_and_swap(key, current.as_ref(), new_state) {
                    return Ok(());
                }
                continue;
            }

            let deficit = cost as f64 - refreshed;
            return Err(Duration::from_secs_f64(deficit / refill_rate));
        }
    }

    fn allow_sliding_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        cost: u64,
    ) -> Result<(), Duration> {
        loop {
            let now = Instant::now();
            let current = self.store.load(key);
            let mut timestamps = match &current {
                Some(BucketState::SlidingWindow { timestamps }) => timestamps.clone(),
                _ => Vec::new(),
            };
            timestamps.retain(|t| now.duration_since(*t) < window);

            if (timestamps.len() as u64) + cost <= limit {
                for _ in 0..cost {
                    timestamps.push(now);
                }
                let new_state = BucketState::SlidingWindow { timestamps };
                if self.store.compare_and_swap(key, current.as_ref(), new_state) {
                    return Ok(());
                }
                continue;
            }

            let retry_after = timestamps
                .first()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            return Err(retry_after);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_tiers() -> TierDefaults {
        let mut tiers = TierDefaults::standard();
        tiers.set_tier(
            Tier::Free,
            TierLimits {
                requests_per_minute: 2,
                tokens_per_day: 10,
                concurrent_connections: 1,
            },
        );
        tiers
    }

    #[test]
    fn token_bucket_admits_up_to_capacity_then_rejects() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::TokenBucket, small_tiers());

        assert!(registry
            .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_ok());
        assert!(registry
            .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_ok());

        let result = registry.allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false);
        assert!(result.is_err());
        assert!(result.unwrap_err() > Duration::ZERO);
    }

    #[test]
    fn sliding_window_admits_up_to_limit_then_rejects() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::SlidingWindow, small_tiers());

        assert!(registry
            .allow("tenant-b", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_ok());
        assert!(registry
            .allow("tenant-b", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_ok());
        assert!(registry
            .allow("tenant-b", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_err());
    }

    #[test]
    fn distinct_tenants_have_independent_buckets() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::TokenBucket, small_tiers());

        assert!(registry
            .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 2, false)
            .is_ok());
        assert!(registry
            .allow("tenant-b", Tier::Free, ResourceFamily::ApiCalls, 2, false)
            .is_ok());
    }

    #[test]
    fn tenant_override_replaces_tier_defaults() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::TokenBucket, small_tiers());
        registry.set_tenant_override(
            "tenant-a",
            TierLimits {
                requests_per_minute: 100,
                tokens_per_day: 100,
                concurrent_connections: 10,
            },
        );

        for _ in 0..5 {
            assert!(registry
                .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false)
                .is_ok());
        }
    }

    #[test]
    fn bypass_never_touches_the_bucket() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::TokenBucket, small_tiers());
        for _ in 0..50 {
            assert!(registry
                .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, true)
                .is_ok());
        }
        // The real bucket is untouched; a normal call still has its full
        // capacity available.
        assert!(registry
            .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 2, false)
            .is_ok());
    }

    #[test]
    fn adaptive_shrinks_capacity_under_load() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::Adaptive, small_tiers())
            .with_load_signal(|| 0.9);

        // capacity scales to floor(2 * 0.5) = 1
        assert!(registry
            .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_ok());
        assert!(registry
            .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_err());
    }

    #[test]
    fn headers_reflect_untouched_bucket_at_full_capacity() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::TokenBucket, small_tiers());
        let headers = registry.headers("tenant-a", Tier::Free, ResourceFamily::ApiCalls);
        assert_eq!(headers.limit, 2);
        assert_eq!(headers.remaining, 2);
    }

    #[test]
    fn headers_report_zero_remaining_once_exhausted() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::TokenBucket, small_tiers());
        for _ in 0..2 {
            assert!(registry
                .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false)
                .is_ok());
        }

        let headers = registry.headers("tenant-a", Tier::Free, ResourceFamily::ApiCalls);
        assert_eq!(headers.limit, 2);
        assert_eq!(headers.remaining, 0);
        assert!(headers.reset_at >= Instant::now());
    }

    #[test]
    fn headers_track_sliding_window_admissions() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::SlidingWindow, small_tiers());
        assert!(registry
            .allow("tenant-b", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_ok());

        let headers = registry.headers("tenant-b", Tier::Free, ResourceFamily::ApiCalls);
        assert_eq!(headers.limit, 2);
        assert_eq!(headers.remaining, 1);
    }

    #[test]
    fn reset_restores_full_capacity() {
        let registry = TenantRateLimiterRegistry::new(Algorithm::TokenBucket, small_tiers());
        for _ in 0..2 {
            assert!(registry
                .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false)
                .is_ok());
        }
        assert!(registry
            .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_err());

        registry.reset("tenant-a", Tier::Free, ResourceFamily::ApiCalls);

        assert!(registry
            .allow("tenant-a", Tier::Free, ResourceFamily::ApiCalls, 1, false)
            .is_ok());
        let headers = registry.headers("tenant-a", Tier::Free, ResourceFamily::ApiCalls);
        assert_eq!(headers.remaining, 1);
    }
}
