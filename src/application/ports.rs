//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::Instant;

/// Port for obtaining current time.
///
/// Expiry and idle decisions are made against this clock, while background
/// tasks are scheduled on the Tokio timer. Infrastructure provides concrete
/// implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for reporting failures that happen away from any caller.
///
/// Background sweeps and spawned tasks have nobody to return an error to.
/// When one of them panics, the panic is caught and handed to the tracer
/// injected at construction instead of a process-wide logger.
pub trait Tracer: Send + Sync + Debug {
    /// Report an error raised by the named background task.
    fn error(&self, task: &str, message: &str);
}

/// Port for a linearizable-per-key concurrent map.
///
/// All operations are callable from many threads without external locking.
/// No operation holds an internal lock longer than one critical section,
/// except [`range`](ConcurrentMap::range), whose visitor runs while a shard
/// is locked. Visitors must therefore be short and must never call back into
/// the same map.
pub trait ConcurrentMap<K, V>: Send + Sync
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Insert or overwrite the value for `key`.
    fn store(&self, key: K, value: V);

    /// Get a copy of the value for `key`.
    fn load(&self, key: &K) -> Option<V>
    where
        V: Clone;

    /// Atomically return the existing value, or insert `value` if absent.
    ///
    /// # Returns
    /// The value now associated with `key`, and `true` if it was already
    /// present (`value` was discarded).
    fn load_or_store(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone;

    /// Remove `key`. Removing an absent key is a no-op.
    fn delete(&self, key: &K);

    /// Atomically remove `key` only if `predicate` holds for its current value.
    ///
    /// # Returns
    /// True if an entry was removed.
    fn delete_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> bool;

    /// Visit entries until `visit` returns `false`.
    ///
    /// The view is consistent per shard but not across the whole traversal.
    fn range<F>(&self, visit: F)
    where
        F: FnMut(&K, &V) -> bool;

    /// Get the number of entries.
    fn len(&self) -> usize;

    /// Check if the map is empty.
    fn is_empty(&self) -> bool;

    /// Remove all entries.
    fn clear(&self);
}
