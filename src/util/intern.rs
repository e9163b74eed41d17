//! Thread-safe string interning.
//!
//! Large logs repeat the same descriptions, task names and keyword names
//! thousands of times. [`StringInterner`] hands out one shared `Arc<str>` per
//! distinct value so resolved events share their text instead of owning copies.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

/// Set of canonical string instances.
///
/// Lookups take a shared lock. A miss upgrades to an exclusive lock and
/// re-checks before inserting, so concurrent callers never store duplicates.
#[derive(Debug, Default)]
pub struct StringInterner {
    values: RwLock<HashSet<Arc<str>>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical instance for `value`, inserting it on first use.
    pub fn intern(&self, value: &str) -> Arc<str> {
        if let Some(existing) = self.values.read().get(value) {
            return Arc::clone(existing);
        }

        let guard = self.values.upgradable_read();
        if let Some(existing) = guard.get(value) {
            return Arc::clone(existing);
        }
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        let interned: Arc<str> = Arc::from(value);
        guard.insert(Arc::clone(&interned));
        interned
    }

    /// Intern an already shared string, keeping the existing allocation when
    /// it becomes the canonical one.
    pub fn intern_arc(&self, value: Arc<str>) -> Arc<str> {
        if let Some(existing) = self.values.read().get(&*value) {
            return Arc::clone(existing);
        }
        let mut guard = self.values.write();
        if let Some(existing) = guard.get(&*value) {
            return Arc::clone(existing);
        }
        guard.insert(Arc::clone(&value));
        value
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Drop every canonical instance. Strings already handed out stay valid.
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_value_returns_same_instance() {
        let interner = StringInterner::new();
        let a = interner.intern("Service started");
        let b = interner.intern(&String::from("Service started"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_concurrent_interning_stores_one_copy() {
        let interner = Arc::new(StringInterner::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let interner = Arc::clone(&interner);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        interner.intern(&format!("value {}", i % 10));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(interner.len(), 10);
    }

    #[test]
    fn test_intern_arc_keeps_first_allocation() {
        let interner = StringInterner::new();
        let first: Arc<str> = Arc::from("Logon");
        let canonical = interner.intern_arc(Arc::clone(&first));
        assert!(Arc::ptr_eq(&first, &canonical));
        let again = interner.intern_arc(Arc::from("Logon"));
        assert!(Arc::ptr_eq(&first, &again));
    }
}
