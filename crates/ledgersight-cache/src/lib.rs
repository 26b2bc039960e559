//! Single-flight computation cache.
//!
//! Expensive analyses (traces, detection passes, assessments) are cached
//! by query key. Concurrent requests for the same missing key share one
//! computation: the first caller computes, the rest subscribe and
//! receive the same result. A failed computation is delivered to every
//! waiter and evicted immediately, so errors are never served from
//! cache.
//!
//! Entries carry the dirty counters of the addresses they depend on;
//! bumping a counter via [`SingleFlightCache::invalidate_address`]
//! makes dependent entries stale without touching unrelated ones.

#![warn(missing_docs)]
#![warn(clippy::all)]

use ledgersight_core::error::{EngineError, Result};
use ledgersight_core::types::AddressId;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

pub use ledgersight_core::config::CacheConfig;

// Failures are broadcast as strings: the owner keeps the typed error,
// waiters get it re-wrapped.
type Shared<V> = std::result::Result<V, String>;

enum Slot<V> {
    Ready {
        value: V,
        deps: Vec<(AddressId, u64)>,
    },
    InFlight(broadcast::Sender<Shared<V>>),
}

struct CacheInner<K, V> {
    slots: HashMap<K, Slot<V>>,
    // Insertion order of ready entries, for size-bound eviction.
    order: Vec<K>,
    dirty: HashMap<AddressId, u64>,
}

/// Keyed single-flight cache with address-level invalidation.
pub struct SingleFlightCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    config: CacheConfig,
    computations: AtomicU64,
    hits: AtomicU64,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                slots: HashMap::new(),
                order: Vec::new(),
                dirty: HashMap::new(),
            }),
            config,
            computations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Fetch the cached value for `key`, computing it once if absent or
    /// stale. `deps` are the addresses whose invalidation makes the
    /// result stale.
    pub async fn get_or_compute<F, Fut>(&self, key: K, deps: &[AddressId], compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let receiver = {
            let inner = self.inner.lock().unwrap();
            match inner.slots.get(&key) {
                Some(Slot::Ready { value, deps }) => {
                    let fresh = deps
                        .iter()
                        .all(|(addr, seen)| inner.dirty.get(addr).copied().unwrap_or(0) == *seen);
                    if fresh {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value.clone());
                    }
                    // Stale: fall through and recompute as owner.
                    None
                }
                Some(Slot::InFlight(sender)) => Some(sender.subscribe()),
                None => None,
            }
        };

        if let Some(rx) = receiver {
            return Self::await_shared(rx).await;
        }

        // Become the owner. Another task may have raced us here, so
        // re-check under the lock.
        let claim = {
            let mut inner = self.inner.lock().unwrap();
            match inner.slots.get(&key) {
                Some(Slot::InFlight(sender)) => Err(sender.subscribe()),
                _ => {
                    let (tx, _) = broadcast::channel(1);
                    inner.slots.insert(key.clone(), Slot::InFlight(tx.clone()));
                    Ok(tx)
                }
            }
        };
        let sender = match claim {
            Ok(sender) => sender,
            Err(rx) => return Self::await_shared(rx).await,
        };

        self.computations.fetch_add(1, Ordering::Relaxed);
        let result = compute().await;

        {
            let mut inner = self.inner.lock().unwrap();
            match &result {
                Ok(value) => {
                    let dep_counters = deps
                        .iter()
                        .map(|addr| (*addr, inner.dirty.get(addr).copied().unwrap_or(0)))
                        .collect();
                    inner.slots.insert(
                        key.clone(),
                        Slot::Ready {
                            value: value.clone(),
                            deps: dep_counters,
                        },
                    );
                    // A stale recompute reuses the key's existing slot in
                    // the eviction order.
                    if !inner.order.contains(&key) {
                        inner.order.push(key.clone());
                    }
                    self.prune(&mut inner);
                }
                Err(error) => {
                    debug!(%error, "computation failed, evicting entry");
                    inner.slots.remove(&key);
                }
            }
        }

        let shared = match &result {
            Ok(value) => Ok(value.clone()),
            Err(error) => Err(error.to_string()),
        };
        // No receivers is fine: nobody else asked while we computed.
        let _ = sender.send(shared);

        result
    }

    async fn await_shared(mut rx: broadcast::Receiver<Shared<V>>) -> Result<V> {
        match rx.recv().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(EngineError::internal(message)),
            Err(_) => Err(EngineError::internal("shared computation abandoned")),
        }
    }

    fn prune(&self, inner: &mut CacheInner<K, V>) {
        while inner.slots.len() > self.config.max_entries {
            let Some(oldest) = inner.order.first().cloned() else {
                break;
            };
            inner.order.remove(0);
            // Never evict an in-flight computation.
            if matches!(inner.slots.get(&oldest), Some(Slot::Ready { .. })) {
                inner.slots.remove(&oldest);
            }
        }
    }

    /// Mark every entry depending on `address` stale.
    pub fn invalidate_address(&self, address: AddressId) {
        let mut inner = self.inner.lock().unwrap();
        *inner.dirty.entry(address).or_insert(0) += 1;
    }

    /// Number of computations actually executed.
    #[must_use]
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// Number of cache hits served.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn cache() -> Arc<SingleFlightCache<String, u64>> {
        Arc::new(SingleFlightCache::new(CacheConfig::default()))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = cache();
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("trace:1".to_string(), &[1], || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42u64)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.computations(), 1);
    }

    #[tokio::test]
    async fn test_invalidation_forces_recompute() {
        let cache = cache();
        let key = "risk:7".to_string();

        cache
            .get_or_compute(key.clone(), &[7], || async { Ok(1u64) })
            .await
            .unwrap();
        // Unrelated address: still fresh.
        cache.invalidate_address(99);
        let v = cache
            .get_or_compute(key.clone(), &[7], || async { Ok(2u64) })
            .await
            .unwrap();
        assert_eq!(v, 1);

        cache.invalidate_address(7);
        let v = cache
            .get_or_compute(key.clone(), &[7], || async { Ok(3u64) })
            .await
            .unwrap();
        assert_eq!(v, 3);
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test]
    async fn test_failed_computation_is_not_cached() {
        let cache = cache();
        let key = "detect:3".to_string();

        let err = cache
            .get_or_compute(key.clone(), &[], || async {
                Err::<u64, _>(EngineError::lookup_unavailable("oracle"))
            })
            .await;
        assert!(err.is_err());
        assert!(cache.is_empty());

        let v = cache
            .get_or_compute(key, &[], || async { Ok(9u64) })
            .await
            .unwrap();
        assert_eq!(v, 9);
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test]
    async fn test_size_bound_evicts_oldest() {
        let cache: SingleFlightCache<String, u64> =
            SingleFlightCache::new(CacheConfig { max_entries: 2 });
        for i in 0..4u64 {
            cache
                .get_or_compute(format!("k{i}"), &[], || async move { Ok(i) })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_hit_counter() {
        let cache = cache();
        let key = "q".to_string();
        cache
            .get_or_compute(key.clone(), &[], || async { Ok(5u64) })
            .await
            .unwrap();
        cache
            .get_or_compute(key, &[], || async { Ok(6u64) })
            .await
            .unwrap();
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.computations(), 1);
    }
}
