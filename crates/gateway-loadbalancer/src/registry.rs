//! Keyed instance registry and the selection strategies that pick among a
//! `(provider, model)` pair's replicas.
//!
//! Grounded in `load_balancer.py`'s `LoadBalancer`: the strategy dispatch,
//! the adaptive scoring formula, and the health-score update on each
//! completed call are all carried over, generalized from one flat instance
//! map into pools keyed by `(provider, model)` so several model families
//! can share one registry.

use crate::events::LoadBalancerEvent;
use crate::instance::{InstanceStats, ManagedInstance, ProviderInstance};
use crate::strategy::LoadBalancingStrategy;
use gateway_core::events::EventListeners;
use rand::Rng;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

type PoolKey = (String, String);

fn stable_hash(s: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

struct Pool {
    instances: Vec<(ProviderInstance, Arc<InstanceStats>)>,
    round_robin: AtomicUsize,
    hash_ring: Vec<(u64, usize)>,
}

impl Pool {
    fn new() -> Self {
        Self {
            instances: Vec::new(),
            round_robin: AtomicUsize::new(0),
            hash_ring: Vec::new(),
        }
    }

    /// Builds `weight * 10` virtual nodes per instance, per the ring-sizing
    /// constant carried over from `_update_hash_ring`.
    fn rebuild_hash_ring(&mut self) {
        let mut ring = Vec::new();
        for (idx, (inst, _)) in self.instances.iter().enumerate() {
            for vnode in 0..(inst.weight * 10) {
                let key = format!("{}:{}", inst.id, vnode);
                ring.push((stable_hash(&key), idx));
            }
        }
        ring.sort_by_key(|(hash, _)| *hash);
        self.hash_ring = ring;
    }
}

/// Registers provider instances and selects among the available replicas of
/// a `(provider, model)` pair.
///
/// One registry is usually shared (behind an `Arc`) across the whole
/// gateway, with the fallback executor driving it through the
/// [`gateway_fallback::LoadBalancer`] adapter implemented below.
pub struct LoadBalancerRegistry {
    strategy: LoadBalancingStrategy,
    pools: RwLock<HashMap<PoolKey, Pool>>,
    by_id: RwLock<HashMap<String, (ProviderInstance, Arc<InstanceStats>)>>,
    event_listeners: EventListeners<LoadBalancerEvent>,
    name: String,
}

impl LoadBalancerRegistry {
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self {
            strategy,
            pools: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            event_listeners: EventListeners::new(),
            name: "load_balancer".to_string(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_event<L>(&mut self, listener: L)
    where
        L: gateway_core::events::EventListener<LoadBalancerEvent> + 'static,
    {
        self.event_listeners.add(listener);
    }

    /// Adds an instance to the pool for its `(provider, model)` pair.
    pub fn register(&self, instance: ProviderInstance) {
        let key = (instance.provider.clone(), instance.model.clone());
        let stats = Arc::new(InstanceStats::new());

        self.by_id
            .write()
            .unwrap()
            .insert(instance.id.clone(), (instance.clone(), Arc::clone(&stats)));

        let mut pools = self.pools.write().unwrap();
        let pool = pools.entry(key).or_insert_with(Pool::new);
        pool.instances.push((instance, stats));
        if self.strategy == LoadBalancingStrategy::ConsistentHash {
            pool.rebuild_hash_ring();
        }
    }

    /// Removes an instance from its `(provider, model)` pool.
    pub fn deregister(&self, provider: &str, model: &str, instance_id: &str) {
        self.by_id.write().unwrap().remove(instance_id);

        let key = (provider.to_string(), model.to_string());
        let mut pools = self.pools.write().unwrap();
        if let Some(pool) = pools.get_mut(&key) {
            pool.instances.retain(|(inst, _)| inst.id != instance_id);
            if self.strategy == LoadBalancingStrategy::ConsistentHash {
                pool.rebuild_hash_ring();
            }
        }
    }

    /// Picks one available instance of `(provider, model)` per the
    /// configured strategy. `request_key` feeds consistent-hash selection
    /// and is ignored by every other strategy.
    pub fn select_instance(
        &self,
        provider: &str,
        model: &str,
        request_key: Option<&str>,
    ) -> Option<Arc<ManagedInstance>> {
        let key = (provider.to_string(), model.to_string());
        let pools = self.pools.read().unwrap();
        let Some(pool) = pools.get(&key) else {
            self.emit_no_healthy_instance(provider, model);
            return None;
        };

        let available: Vec<usize> = pool
            .instances
            .iter()
            .enumerate()
            .filter(|(_, (inst, stats))| {
                stats.available.load(Ordering::Acquire)
                    && stats.current_connections.load(Ordering::Acquire) < inst.max_connections
            })
            .map(|(idx, _)| idx)
            .collect();

        if available.is_empty() {
            self.emit_no_healthy_instance(provider, model);
            return None;
        }

        let chosen = match self.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let i = pool.round_robin.fetch_add(1, Ordering::Relaxed);
                available[i % available.len()]
            }
            LoadBalancingStrategy::WeightedRoundRobin => {
                let mut weighted = Vec::new();
                for &idx in &available {
                    for _ in 0..pool.instances[idx].0.weight {
                        weighted.push(idx);
                    }
                }
                let i = pool.round_robin.fetch_add(1, Ordering::Relaxed);
                weighted[i % weighted.len()]
            }
            LoadBalancingStrategy::LeastConnections => *available
                .iter()
                .min_by_key(|&&idx| pool.instances[idx].1.current_connections.load(Ordering::Acquire))
                .unwrap(),
            LoadBalancingStrategy::LeastResponseTime => *available
                .iter()
                .min_by(|&&a, &&b| {
                    let la = *pool.instances[a].1.avg_response_time_ms.lock().unwrap();
                    let lb = *pool.instances[b].1.avg_response_time_ms.lock().unwrap();
                    la.partial_cmp(&lb).unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap(),
            LoadBalancingStrategy::Random => {
                available[rand::rng().random_range(0..available.len())]
            }
            LoadBalancingStrategy::ConsistentHash => {
                let owned_key;
                let hash_key = match request_key {
                    Some(k) => k,
                    None => {
                        owned_key = format!("{:?}", Instant::now());
                        owned_key.as_str()
                    }
                };
                let target = stable_hash(hash_key);
                pool.hash_ring
                    .iter()
                    .find(|(hash, idx)| *hash >= target && available.contains(idx))
                    .or_else(|| pool.hash_ring.iter().find(|(_, idx)| available.contains(idx)))
                    .map(|(_, idx)| *idx)
                    .unwrap_or(available[0])
            }
            LoadBalancingStrategy::Adaptive => self.select_adaptive(pool, &available),
        };

        let (config, stats) = &pool.instances[chosen];
        Some(Arc::new(ManagedInstance {
            config: config.clone(),
            stats: Arc::clone(stats),
        }))
    }

    fn select_adaptive(&self, pool: &Pool, available: &[usize]) -> usize {
        let mut scored: Vec<(usize, f64)> = available
            .iter()
            .map(|&idx| {
                let (inst, stats) = &pool.instances[idx];
                (idx, Self::score(inst, stats))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pool.instances[a.0].0.id.cmp(&pool.instances[b.0].0.id))
        });
        scored.truncate(3);

        let total: f64 = scored.iter().map(|(_, score)| score).sum();
        if total <= 0.0 {
            return scored[0].0;
        }

        let mut remaining = rand::rng().random_range(0.0..total);
        for &(idx, score) in &scored {
            remaining -= score;
            if remaining <= 0.0 {
                return idx;
            }
        }
        scored.last().unwrap().0
    }

    /// The four-signal blend from design §4.4: connection availability,
    /// response time, error rate, and a recency penalty for recent errors.
    fn score(inst: &ProviderInstance, stats: &InstanceStats) -> f64 {
        let mut score = *stats.health_score.lock().unwrap();

        let in_flight = stats.current_connections.load(Ordering::Acquire) as f64;
        let max = inst.max_connections.max(1) as f64;
        let connection_ratio = 1.0 - (in_flight / max);
        score *= 0.5 + 0.5 * connection_ratio;

        let latency = *stats.avg_response_time_ms.lock().unwrap();
        if latency > 0.0 {
            let response_factor = 1000.0 / (1000.0 + latency);
            score *= 0.7 + 0.3 * response_factor;
        }

        let total_requests = stats.total_requests.load(Ordering::Acquire);
        if total_requests > 0 {
            let error_rate =
                stats.total_errors.load(Ordering::Acquire) as f64 / total_requests as f64;
            score *= 1.0 - error_rate;
        }

        if let Some(last_error) = *stats.last_error_at.lock().unwrap() {
            let since = last_error.elapsed();
            if since < Duration::from_secs(60) {
                score *= 0.5;
            } else if since < Duration::from_secs(300) {
                score *= 0.8;
            }
        }

        score.clamp(0.0, 1.0)
    }

    fn stats_for(&self, instance_id: &str) -> Option<(ProviderInstance, Arc<InstanceStats>)> {
        self.by_id.read().unwrap().get(instance_id).cloned()
    }

    /// Marks the start of an attempt against `instance_id` (in-flight++).
    pub fn mark_start(&self, instance_id: &str) {
        if let Some((_, stats)) = self.stats_for(instance_id) {
            stats.current_connections.fetch_add(1, Ordering::AcqRel);
            stats.total_requests.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Marks the end of an attempt against `instance_id`, folding the
    /// result into its EMA latency and health score (design §4.4).
    pub fn mark_end(&self, instance_id: &str, success: bool, latency: Duration) {
        let Some((inst, stats)) = self.stats_for(instance_id) else {
            return;
        };

        let _ = stats.current_connections.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |c| Some(c.saturating_sub(1)),
        );

        if !success {
            stats.total_errors.fetch_add(1, Ordering::AcqRel);
            *stats.last_error_at.lock().unwrap() = Some(Instant::now());
        }

        let alpha = 0.1;
        let latency_ms = latency.as_secs_f64() * 1000.0;
        {
            let mut avg = stats.avg_response_time_ms.lock().unwrap();
            *avg = (1.0 - alpha) * *avg + alpha * latency_ms;
        }

        self.update_health_score(&inst, &stats);
    }

    fn update_health_score(&self, inst: &ProviderInstance, stats: &InstanceStats) {
        let mut score = 1.0f64;

        let total_requests = stats.total_requests.load(Ordering::Acquire);
        if total_requests > 10 {
            let error_rate =
                stats.total_errors.load(Ordering::Acquire) as f64 / total_requests as f64;
            score *= 1.0 - error_rate;
        }

        let latency = *stats.avg_response_time_ms.lock().unwrap();
        if latency > 5000.0 {
            score *= 0.5;
        } else if latency > 2000.0 {
            score *= 0.8;
        }

        let in_flight = stats.current_connections.load(Ordering::Acquire) as f64;
        let max = inst.max_connections.max(1) as f64;
        let saturation = in_flight / max;
        if saturation > 0.9 {
            score *= 0.7;
        } else if saturation > 0.7 {
            score *= 0.9;
        }

        let clamped = score.clamp(0.1, 1.0);
        *stats.health_score.lock().unwrap() = clamped;

        if clamped < 0.2 && stats.available.swap(false, Ordering::AcqRel) {
            self.event_listeners.emit(&LoadBalancerEvent::InstanceMarkedUnavailable {
                pattern_name: self.name.clone(),
                timestamp: Instant::now(),
                instance_id: inst.id.clone(),
                health_score: clamped,
            });
        }
    }

    fn emit_no_healthy_instance(&self, provider: &str, model: &str) {
        self.event_listeners.emit(&LoadBalancerEvent::NoHealthyInstance {
            pattern_name: self.name.clone(),
            timestamp: Instant::now(),
            provider: provider.to_string(),
            model: model.to_string(),
        });
    }

    /// Runs one probe pass against every registered instance, raising
    /// health on success and halving it on failure, per
    /// `_health_check_loop`/`_check_instance_health`. Intended to be driven
    /// by a periodic caller (e.g. a `tokio::time::interval` every ~30s);
    /// probing never blocks [`Self::select_instance`].
    pub async fn run_health_probe<F, Fut>(&self, probe: F)
    where
        F: Fn(ProviderInstance) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let snapshot: Vec<(ProviderInstance, Arc<InstanceStats>)> =
            self.by_id.read().unwrap().values().cloned().collect();

        for (inst, stats) in snapshot {
            let was_available = stats.available.load(Ordering::Acquire);
            let started = Instant::now();
            let healthy = probe(inst.clone()).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            stats.available.store(healthy, Ordering::Release);

            if healthy {
                let alpha = 0.05;
                {
                    let mut avg = stats.avg_response_time_ms.lock().unwrap();
                    *avg = (1.0 - alpha) * *avg + alpha * elapsed_ms;
                }
                let mut health = stats.health_score.lock().unwrap();
                let new_health = (*health * 1.1).min(1.0);
                *health = new_health;
                drop(health);

                if !was_available {
                    self.event_listeners.emit(&LoadBalancerEvent::InstanceRecovered {
                        pattern_name: self.name.clone(),
                        timestamp: Instant::now(),
                        instance_id: inst.id.clone(),
                        health_score: new_health,
                    });
                }
            } else {
                let mut health = stats.health_score.lock().unwrap();
                *health = (*health * 0.8).max(0.1);
                drop(health);
                *stats.last_error_at.lock().unwrap() = Some(Instant::now());
            }
        }
    }
}

impl<Req> gateway_fallback::LoadBalancer<Req> for LoadBalancerRegistry
where
    Req: RequestKey + Send + Sync,
{
    fn select(
        &self,
        provider: &str,
        model: &str,
        request: &Req,
    ) -> Option<Arc<dyn gateway_fallback::Instance>> {
        self.select_instance(provider, model, request.request_key())
            .map(|managed| managed as Arc<dyn gateway_fallback::Instance>)
    }

    fn record_attempt_start(&self, instance: &dyn gateway_fallback::Instance) {
        self.mark_start(instance.instance_id());
    }

    fn record_success(&self, instance: &dyn gateway_fallback::Instance, latency: Duration) {
        self.mark_end(instance.instance_id(), true, latency);
    }

    fn record_failure(&self, instance: &dyn gateway_fallback::Instance) {
        self.mark_end(instance.instance_id(), false, Duration::ZERO);
    }
}

/// Extracts the consistent-hash key from a request, if any. Implemented for
/// `String`/`str` directly; other request types can implement this to opt
/// into session-sticky routing.
pub trait RequestKey {
    fn request_key(&self) -> Option<&str> {
        None
    }
}

impl RequestKey for str {
    fn request_key(&self) -> Option<&str> {
        Some(self)
    }
}

impl RequestKey for String {
    fn request_key(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_three(registry: &LoadBalancerRegistry) {
        registry.register(ProviderInstance::new("a", "openai", "gpt-4", "https://a"));
        registry.register(ProviderInstance::new("b", "openai", "gpt-4", "https://b"));
        registry.register(ProviderInstance::new("c", "openai", "gpt-4", "https://c"));
    }

    #[test]
    fn round_robin_cycles_through_instances() {
        let registry = LoadBalancerRegistry::new(LoadBalancingStrategy::RoundRobin);
        register_three(&registry);

        let first = registry.select_instance("openai", "gpt-4", None).unwrap();
        let second = registry.select_instance("openai", "gpt-4", None).unwrap();
        let third = registry.select_instance("openai", "gpt-4", None).unwrap();
        let fourth = registry.select_instance("openai", "gpt-4", None).unwrap();

        assert_eq!(first.provider_instance().id, "a");
        assert_eq!(second.provider_instance().id, "b");
        assert_eq!(third.provider_instance().id, "c");
        assert_eq!(fourth.provider_instance().id, "a");
    }

    #[test]
    fn unknown_pair_reports_no_healthy_instance() {
        let registry = LoadBalancerRegistry::new(LoadBalancingStrategy::RoundRobin);
        assert!(registry.select_instance("anthropic", "claude-3-opus", None).is_none());
    }

    #[test]
    fn saturated_instance_is_excluded() {
        let registry = LoadBalancerRegistry::new(LoadBalancingStrategy::RoundRobin);
        registry.register(
            ProviderInstance::new("a", "openai", "gpt-4", "https://a").max_connections(1),
        );
        registry.mark_start("a");

        assert!(registry.select_instance("openai", "gpt-4", None).is_none());
    }

    #[test]
    fn repeated_failures_mark_instance_unavailable() {
        let registry = LoadBalancerRegistry::new(LoadBalancingStrategy::RoundRobin);
        registry.register(ProviderInstance::new("a", "openai", "gpt-4", "https://a"));

        for _ in 0..20 {
            registry.mark_start("a");
            registry.mark_end("a", false, Duration::from_millis(10));
        }

        assert!(registry.select_instance("openai", "gpt-4", None).is_none());
    }

    #[test]
    fn consistent_hash_is_stable_for_same_key() {
        let registry = LoadBalancerRegistry::new(LoadBalancingStrategy::ConsistentHash);
        register_three(&registry);

        let first = registry.select_instance("openai", "gpt-4", Some("session-42")).unwrap();
        let second = registry.select_instance("openai", "gpt-4", Some("session-42")).unwrap();
        assert_eq!(first.provider_instance().id, second.provider_instance().id);
    }

    #[test]
    fn adaptive_excludes_instance_with_collapsed_health_score() {
        let registry = LoadBalancerRegistry::new(LoadBalancingStrategy::Adaptive);
        registry.register(ProviderInstance::new("good", "openai", "gpt-4", "https://good"));
        registry.register(ProviderInstance::new("bad", "openai", "gpt-4", "https://bad"));

        for _ in 0..20 {
            registry.mark_start("bad");
            registry.mark_end("bad", false, Duration::from_millis(10));
        }
        for _ in 0..20 {
            registry.mark_start("good");
            registry.mark_end("good", true, Duration::from_millis(10));
        }

        for _ in 0..50 {
            let selected = registry.select_instance("openai", "gpt-4", None);
            assert_eq!(selected.unwrap().provider_instance().id, "good");
        }
    }

    #[tokio::test]
    async fn health_probe_recovers_unavailable_instance() {
        let registry = LoadBalancerRegistry::new(LoadBalancingStrategy::RoundRobin);
        registry.register(ProviderInstance::new("a", "openai", "gpt-4", "https://a"));

        for _ in 0..20 {
            registry.mark_start("a");
            registry.mark_end("a", false, Duration::from_millis(10));
        }
        assert!(registry.select_instance("openai", "gpt-4", None).is_none());

        registry.run_health_probe(|_inst| async { true }).await;

        assert!(registry.select_instance("openai", "gpt-4", None).is_some());
    }
}
