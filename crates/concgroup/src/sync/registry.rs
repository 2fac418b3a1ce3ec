//! Registry mapping group keys to their locks

use crate::multi::KeySet;
use crate::sync::KeyLock;
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Registry of per-key locks owned by a group
///
/// Locks are created on first use and live as long as the registry. The map
/// shard lock is held only for the lookup or insert itself, never while a
/// key lock is held.
pub struct KeyRegistry {
    /// Map of group key to its lock
    locks: DashMap<String, Arc<KeyLock>, FxBuildHasher>,
}

impl KeyRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            locks: DashMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Get the lock for `key`, creating it on first use
    ///
    /// Every call with the same key returns the same lock.
    pub fn lock_for(&self, key: &str) -> Arc<KeyLock> {
        if let Some(existing) = self.locks.get(key) {
            return Arc::clone(existing.value());
        }

        let entry = self.locks.entry(key.to_owned()).or_insert_with(|| {
            let lock = Arc::new(KeyLock::new(key));
            tracing::trace!(key, id = lock.id().as_u64(), "created key lock");
            lock
        });
        Arc::clone(entry.value())
    }

    /// Get the locks for every key of `keys`, in the key set's order
    pub fn locks_for(&self, keys: &KeySet) -> Vec<Arc<KeyLock>> {
        keys.iter().map(|key| self.lock_for(key)).collect()
    }

    /// Get the lock for `key` without creating it
    pub fn get(&self, key: &str) -> Option<Arc<KeyLock>> {
        self.locks.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Get the number of registered keys
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Sorted snapshot of all registered keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.locks.iter().map(|entry| entry.key().clone()).collect();
        keys.sort_unstable();
        keys
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_registry_creation() {
        let registry = KeyRegistry::new();
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_same_key_same_lock() {
        let registry = KeyRegistry::new();

        let first = registry.lock_for("samegroup");
        let second = registry.lock_for("samegroup");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id(), second.id());
        assert_eq!(first.key(), "samegroup");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_distinct_keys() {
        let registry = KeyRegistry::new();

        let one = registry.lock_for("one");
        let two = registry.lock_for("two");

        assert!(!Arc::ptr_eq(&one, &two));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.keys(), vec!["one".to_string(), "two".to_string()]);
        assert!(Arc::ptr_eq(&registry.get("one").unwrap(), &one));
    }

    #[test]
    fn test_registry_locks_for_key_set() {
        let registry = KeyRegistry::new();
        let single = registry.lock_for("b");

        let keys = KeySet::new(["c", "b", "a", "b"]);
        let locks = registry.locks_for(&keys);

        let names: Vec<&str> = locks.iter().map(|lock| lock.key()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(Arc::ptr_eq(&locks[1], &single));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_registry_concurrent_first_use() {
        let registry = Arc::new(KeyRegistry::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.lock_for("contended").id())
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_does_not_hold_key_lock() {
        let registry = KeyRegistry::new();
        let lock = registry.lock_for("busy");
        let _guard = lock.try_lock().unwrap();

        // Map access must not contend with a held key lock
        let again = registry.lock_for("busy");
        assert!(again.is_locked());
        assert_eq!(registry.keys(), vec!["busy".to_string()]);
    }
}
