//! Concurrent map implementation.
//!
//! Provides the sharded map backing every store in this crate.

use crate::application::ports::ConcurrentMap;
use ahash::RandomState;
use dashmap::DashMap;
use std::hash::Hash;

/// Thread-safe sharded map backed by DashMap.
///
/// DashMap provides lock-free reads and fine-grained per-shard locking for
/// writes, so request handlers touching different keys rarely contend.
/// Keys are hashed with ahash.
#[derive(Debug)]
pub struct ShardedMap<K, V>
where
    K: Eq + Hash,
{
    map: DashMap<K, V, RandomState>,
}

impl<K, V> ShardedMap<K, V>
where
    K: Eq + Hash,
{
    /// Create a new empty map.
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::new()),
        }
    }
}

impl<K, V> Default for ShardedMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ConcurrentMap<K, V> for ShardedMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    fn store(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    fn load(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    fn load_or_store(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        match self.map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => (existing.get().clone(), true),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let stored = slot.insert(value);
                (stored.value().clone(), false)
            }
        }
    }

    fn delete(&self, key: &K) {
        self.map.remove(key);
    }

    fn delete_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> bool {
        self.map.remove_if(key, |_, value| predicate(value)).is_some()
    }

    fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        for entry in self.map.iter() {
            if !visit(entry.key(), entry.value()) {
                break;
            }
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&self) {
        self.map.clear()
    }
}

// Implement ConcurrentMap for Arc<ShardedMap> so a map can be shared directly
impl<K, V> ConcurrentMap<K, V> for std::sync::Arc<ShardedMap<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    fn store(&self, key: K, value: V) {
        (**self).store(key, value)
    }

    fn load(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        (**self).load(key)
    }

    fn load_or_store(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        (**self).load_or_store(key, value)
    }

    fn delete(&self, key: &K) {
        (**self).delete(key)
    }

    fn delete_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> bool {
        (**self).delete_if(key, predicate)
    }

    fn range<F>(&self, visit: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        (**self).range(visit)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn clear(&self) {
        (**self).clear()
    }
}
