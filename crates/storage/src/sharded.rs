//! Sharded committed-data store
//!
//! DashMap keyed by record, hashed with FxHash. Reads take a shard read
//! guard, writes lock only the target shard, and different keys in different
//! shards never contend.
//!
//! The store only ever holds committed data. Uncommitted writes stay in the
//! transaction's write set or the exposure table until commit installs them
//! through [`Storage::put`].

use dashmap::DashMap;
use morph_core::{Key, Storage, VersionedValue};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Committed record store sharded by key hash
///
/// # Example
///
/// ```
/// use morph_core::{Key, Storage, VersionedValue};
/// use morph_storage::ShardedStore;
///
/// let store = ShardedStore::new();
/// let version = store.next_version();
/// store.put(Key::from("stock:7"), VersionedValue::new(b"12".to_vec(), version));
/// assert_eq!(store.version_of(&Key::from("stock:7")), version);
/// ```
pub struct ShardedStore {
    data: DashMap<Key, VersionedValue, FxBuildHasher>,
    /// Last handed-out commit version
    version: AtomicU64,
}

impl ShardedStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            data: DashMap::with_hasher(FxBuildHasher::default()),
            version: AtomicU64::new(0),
        }
    }

    /// Create with room for `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: DashMap::with_capacity_and_hasher(capacity, FxBuildHasher::default()),
            version: AtomicU64::new(0),
        }
    }

    /// Current version
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Increment version and return the new value
    #[inline]
    pub fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Set version (used when bulk-loading)
    pub fn set_version(&self, version: u64) {
        self.version.store(version, Ordering::Release);
    }

    /// Number of committed records
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if a key exists
    #[inline]
    pub fn contains(&self, key: &Key) -> bool {
        self.data.contains_key(key)
    }

    /// Install a batch of writes at one version
    pub fn apply_batch(&self, writes: &[(Key, Vec<u8>)], version: u64) {
        for (key, value) in writes {
            self.data
                .insert(key.clone(), VersionedValue::new(value.clone(), version));
        }
        trace!(writes = writes.len(), version, "Applied batch");
    }

    /// Entries whose key starts with `prefix`, sorted by key
    ///
    /// Full scan plus sort; not for hot paths.
    pub fn list_by_prefix(&self, prefix: &[u8]) -> Vec<(Key, VersionedValue)> {
        let mut results: Vec<_> = self
            .data
            .iter()
            .filter(|entry| entry.key().as_bytes().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        results.sort_by(|(a, _), (b, _)| a.cmp(b));
        results
    }

    /// Drop every record and reset the version
    pub fn clear(&self) {
        self.data.clear();
        self.version.store(0, Ordering::Release);
    }
}

impl Storage for ShardedStore {
    #[inline]
    fn get(&self, key: &Key) -> Option<VersionedValue> {
        self.data.get(key).map(|v| v.value().clone())
    }

    #[inline]
    fn put(&self, key: Key, value: VersionedValue) {
        self.data.insert(key, value);
    }

    #[inline]
    fn delete(&self, key: &Key) -> Option<VersionedValue> {
        self.data.remove(key).map(|(_, v)| v)
    }

    fn version_of(&self, key: &Key) -> u64 {
        self.data.get(key).map(|v| v.version).unwrap_or(0)
    }
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("version", &self.version())
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_store_creation() {
        let store = ShardedStore::new();
        assert!(store.is_empty());
        assert_eq!(store.version(), 0);
        assert!(ShardedStore::with_capacity(100).is_empty());
    }

    #[test]
    fn test_version_increment() {
        let store = ShardedStore::new();
        assert_eq!(store.next_version(), 1);
        assert_eq!(store.next_version(), 2);
        assert_eq!(store.version(), 2);
        store.set_version(100);
        assert_eq!(store.version(), 100);
    }

    #[test]
    fn test_version_thread_safety() {
        let store = Arc::new(ShardedStore::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.next_version();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.version(), 1000);
    }

    #[test]
    fn test_put_get_delete() {
        let store = ShardedStore::new();
        let key = Key::from("district:3");
        assert!(store.get(&key).is_none());
        assert_eq!(store.version_of(&key), 0);

        store.put(key.clone(), VersionedValue::new(b"a".to_vec(), 4));
        assert_eq!(store.get(&key).unwrap().value, b"a".to_vec());
        assert_eq!(store.version_of(&key), 4);
        assert!(store.contains(&key));

        let removed = store.delete(&key).unwrap();
        assert_eq!(removed.version, 4);
        assert!(!store.contains(&key));
        assert!(store.delete(&key).is_none());
    }

    #[test]
    fn test_apply_batch_uses_one_version() {
        let store = ShardedStore::new();
        let writes = vec![
            (Key::from("a"), b"1".to_vec()),
            (Key::from("b"), b"2".to_vec()),
        ];
        store.apply_batch(&writes, 9);
        assert_eq!(store.version_of(&Key::from("a")), 9);
        assert_eq!(store.version_of(&Key::from("b")), 9);
    }

    #[test]
    fn test_list_by_prefix_sorted() {
        let store = ShardedStore::new();
        for name in ["item:3", "item:1", "stock:1", "item:2"] {
            store.put(Key::from(name), VersionedValue::new(b"x".to_vec(), 1));
        }
        let keys: Vec<String> = store
            .list_by_prefix(b"item:")
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["item:1", "item:2", "item:3"]);
    }

    #[test]
    fn test_clear() {
        let store = ShardedStore::new();
        store.put(Key::from(1u64), VersionedValue::new(vec![1], store.next_version()));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_debug_impl() {
        let debug_str = format!("{:?}", ShardedStore::new());
        assert!(debug_str.contains("ShardedStore"));
        assert!(debug_str.contains("entries"));
    }

    #[test]
    fn test_concurrent_writers_disjoint_keys() {
        let store = Arc::new(ShardedStore::new());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        let v = store.next_version();
                        store.put(Key::from(t * 1000 + i), VersionedValue::new(vec![t as u8], v));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 2000);
        assert_eq!(store.version(), 2000);
    }

    proptest! {
        #[test]
        fn prop_last_put_wins(values in proptest::collection::vec(any::<u8>(), 1..20)) {
            let store = ShardedStore::new();
            let key = Key::from("k");
            for (i, v) in values.iter().enumerate() {
                store.put(key.clone(), VersionedValue::new(vec![*v], i as u64 + 1));
            }
            let got = store.get(&key).unwrap();
            prop_assert_eq!(got.value, vec![*values.last().unwrap()]);
            prop_assert_eq!(got.version, values.len() as u64);
        }
    }
}
