//! Per-resolver memoization of provider metadata.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::core::provider_details::ProviderDetails;

/// Provider metadata keyed by lowercase provider name.
///
/// A hit is a plain shared read. A miss takes the upgradable lock, checks
/// again, runs the loader and only then upgrades to insert, so concurrent
/// misses for one provider load it once.
#[derive(Debug, Default)]
pub struct ProviderDetailsCache {
    entries: RwLock<HashMap<String, Arc<ProviderDetails>>>,
}

impl ProviderDetailsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, provider_name: &str) -> Option<Arc<ProviderDetails>> {
        self.entries
            .read()
            .get(&ProviderDetails::key(provider_name))
            .cloned()
    }

    /// Return the cached details, calling `load` on the first request.
    pub fn get_or_load(
        &self,
        provider_name: &str,
        load: impl FnOnce(&str) -> ProviderDetails,
    ) -> Arc<ProviderDetails> {
        let key = ProviderDetails::key(provider_name);
        if let Some(hit) = self.entries.read().get(&key) {
            return Arc::clone(hit);
        }

        let guard = self.entries.upgradable_read();
        if let Some(hit) = guard.get(&key) {
            return Arc::clone(hit);
        }
        let details = Arc::new(load(provider_name));
        tracing::debug!("Cached {}", details.summary());
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard.insert(key, Arc::clone(&details));
        details
    }

    /// Forget one provider. Returns `true` if it was cached.
    pub fn evict(&self, provider_name: &str) -> bool {
        self.entries
            .write()
            .remove(&ProviderDetails::key(provider_name))
            .is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_loads_once_per_provider() {
        let cache = ProviderDetailsCache::new();
        let loads = AtomicUsize::new(0);
        let load = |name: &str| {
            loads.fetch_add(1, Ordering::SeqCst);
            ProviderDetails::empty(name)
        };
        cache.get_or_load("Prov", load);
        cache.get_or_load("PROV", load);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_forces_reload() {
        let cache = ProviderDetailsCache::new();
        cache.get_or_load("Prov", |n| ProviderDetails::empty(n));
        assert!(cache.evict("prov"));
        assert!(!cache.evict("prov"));
        assert!(cache.get("Prov").is_none());
    }

    #[test]
    fn test_concurrent_misses_load_once() {
        let cache = Arc::new(ProviderDetailsCache::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                std::thread::spawn(move || {
                    cache.get_or_load("Shared", |name| {
                        loads.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        ProviderDetails::empty(name)
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
