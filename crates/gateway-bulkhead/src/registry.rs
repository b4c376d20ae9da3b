//! Keyed bulkhead registry.
//!
//! Backend client handles are pooled per provider instance, and each pool
//! honors its own declared `max_concurrent_requests` (design §3,
//! `ProviderInstance`). A single shared semaphore would conflate unrelated
//! instances, so this registry hands out one permit-guarded semaphore per
//! instance id, created lazily the first time that instance is used.

use crate::error::BulkheadError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct Pool {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

/// A held slot in a provider instance's connection pool. Releases the slot
/// when dropped, including on cancellation.
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
}

/// A registry of independent concurrency limiters keyed by provider instance
/// id, mirroring [`crate::Bulkhead`]'s semaphore-based admission but with one
/// pool per instance instead of one per wrapped service.
pub struct BulkheadRegistry {
    max_wait: Option<Duration>,
    pools: RwLock<HashMap<String, Arc<Pool>>>,
}

impl BulkheadRegistry {
    /// Creates an empty registry. Pools are created lazily via
    /// [`BulkheadRegistry::register_instance`] or on first
    /// [`BulkheadRegistry::acquire`] (with a default capacity of 1, which
    /// callers should immediately correct via `register_instance`).
    pub fn new(max_wait: Option<Duration>) -> Self {
        Self {
            max_wait,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Declares (or re-declares) the capacity for a provider instance.
    /// Shrinking capacity does not revoke permits already on loan; it only
    /// affects future acquisitions.
    pub fn register_instance(&self, instance_id: &str, max_concurrent: usize) {
        let mut pools = self.pools.write().unwrap();
        pools.insert(
            instance_id.to_string(),
            Arc::new(Pool {
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
            }),
        );
    }

    fn pool_for(&self, instance_id: &str) -> Arc<Pool> {
        if let Some(pool) = self.pools.read().unwrap().get(instance_id) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write().unwrap();
        pools
            .entry(instance_id.to_string())
            .or_insert_with(|| {
                Arc::new(Pool {
                    semaphore: Arc::new(Semaphore::new(1)),
                    max_concurrent: 1,
                })
            })
            .clone()
    }

    /// Acquires a slot in `instance_id`'s pool, waiting up to the registry's
    /// configured `max_wait` (if any).
    pub async fn acquire(&self, instance_id: &str) -> Result<PoolPermit, BulkheadError> {
        let pool = self.pool_for(instance_id);
        let semaphore = Arc::clone(&pool.semaphore);

        let permit = match self.max_wait {
            Some(duration) => tokio::time::timeout(duration, semaphore.acquire_owned())
                .await
                .map_err(|_| BulkheadError::Timeout)?
                .map_err(|_| BulkheadError::BulkheadFull {
                    max_concurrent_calls: pool.max_concurrent,
                })?,
            None => semaphore
                .acquire_owned()
                .await
                .map_err(|_| BulkheadError::BulkheadFull {
                    max_concurrent_calls: pool.max_concurrent,
                })?,
        };

        Ok(PoolPermit { _permit: permit })
    }

    /// Current in-flight count for a provider instance, for the
    /// `ProviderInstance.in_flight` data-model field.
    pub fn in_flight(&self, instance_id: &str) -> usize {
        let pools = self.pools.read().unwrap();
        match pools.get(instance_id) {
            Some(pool) => pool.max_concurrent - pool.semaphore.available_permits(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn independent_instances_have_independent_pools() {
        let registry = BulkheadRegistry::new(None);
        registry.register_instance("openai-us-east-1", 1);
        registry.register_instance("openai-us-west-2", 1);

        let _permit = registry.acquire("openai-us-east-1").await.unwrap();
        assert_eq!(registry.in_flight("openai-us-east-1"), 1);
        assert_eq!(registry.in_flight("openai-us-west-2"), 0);

        assert!(registry.acquire("openai-us-west-2").await.is_ok());
    }

    #[tokio::test]
    async fn full_pool_times_out() {
        let registry = BulkheadRegistry::new(Some(Duration::from_millis(20)));
        registry.register_instance("local-llama", 1);

        let _held = registry.acquire("local-llama").await.unwrap();
        let err = registry.acquire("local-llama").await.unwrap_err();
        assert!(matches!(err, BulkheadError::Timeout));
    }

    #[tokio::test]
    async fn permit_releases_slot_on_drop() {
        let registry = BulkheadRegistry::new(None);
        registry.register_instance("anthropic-primary", 1);

        {
            let _permit = registry.acquire("anthropic-primary").await.unwrap();
            assert_eq!(registry.in_flight("anthropic-primary"), 1);
        }
        assert_eq!(registry.in_flight("anthropic-primary"), 0);
    }
}
