//! Memoizing wrappers around fallible computations.
//!
//! A wrapped function returns `(value, cached)` where `cached` tells whether
//! the value came from the cache. Only successful results are cached: an
//! error is handed back unchanged and the next call computes again.
//!
//! Concurrent misses on the same key are not coalesced. Each caller runs the
//! computation and the last result stored wins.

use crate::application::ports::ConcurrentMap;
use crate::application::ttl_store::{BuildError, TtlStore};
use crate::infrastructure::storage::ShardedMap;
use std::hash::Hash;
use std::time::Duration;

/// Cache every successful result of `compute` forever.
///
/// # Example
///
/// ```rust
/// use ephemera::with_cache;
///
/// let square = with_cache(|n: &u64| Ok::<_, String>(n * n));
///
/// assert_eq!(square(4), Ok((16, false)));
/// assert_eq!(square(4), Ok((16, true)));
/// ```
pub fn with_cache<K, V, E, F>(compute: F) -> impl Fn(K) -> Result<(V, bool), E> + Send + Sync
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
    F: Fn(&K) -> Result<V, E> + Send + Sync,
{
    let cache: ShardedMap<K, V> = ShardedMap::new();

    move |key: K| {
        if let Some(value) = cache.load(&key) {
            return Ok((value, true));
        }

        let value = compute(&key)?;
        cache.store(key, value.clone());
        Ok((value, false))
    }
}

/// Cache successful results of `compute` for `ttl` in a dedicated store.
///
/// # Errors
/// Returns `BuildError::NoRuntime` when called outside of a Tokio runtime,
/// since the backing store needs one for its sweeper.
pub fn with_ttl_cache<K, V, E, F>(
    ttl: Duration,
    compute: F,
) -> Result<impl Fn(K) -> Result<(V, bool), E> + Send + Sync, BuildError>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K) -> Result<V, E> + Send + Sync,
{
    let store = TtlStore::builder().build()?;
    Ok(with_ttl_cache_in(store, ttl, compute))
}

/// Like [`with_ttl_cache`], backed by an existing `store`.
///
/// Sharing a store lets callers inspect, clear or re-policy the cache.
pub fn with_ttl_cache_in<K, V, E, F>(
    store: TtlStore<K, V>,
    ttl: Duration,
    compute: F,
) -> impl Fn(K) -> Result<(V, bool), E> + Send + Sync
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K) -> Result<V, E> + Send + Sync,
{
    move |key: K| {
        if let Some(value) = store.load(&key) {
            return Ok((value, true));
        }

        let value = compute(&key)?;
        store.store(key, value.clone(), ttl);
        Ok((value, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_with_cache_hits_after_first_call() {
        let calls = AtomicU32::new(0);
        let cached = with_cache(|key: &String| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(key.len())
        });

        assert_eq!(cached("abc".to_string()), Ok((3, false)));
        assert_eq!(cached("abc".to_string()), Ok((3, true)));
        assert_eq!(cached("de".to_string()), Ok((2, false)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_with_cache_does_not_cache_errors() {
        let calls = AtomicU32::new(0);
        let cached = with_cache(|_: &&str| {
            // Fail the first attempt only
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("unavailable")
            } else {
                Ok(7)
            }
        });

        assert_eq!(cached("k"), Err("unavailable"));
        assert_eq!(cached("k"), Ok((7, false)));
        assert_eq!(cached("k"), Ok((7, true)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_with_ttl_cache_requires_runtime() {
        let result = with_ttl_cache(Duration::from_secs(1), |k: &u32| Ok::<_, ()>(*k));
        assert!(matches!(result, Err(BuildError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_with_ttl_cache_expires() {
        let clock = MockClock::starting_now();
        let store: TtlStore<u32, u32> = TtlStore::builder()
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        let calls = AtomicU32::new(0);

        let cached = with_ttl_cache_in(store.clone(), Duration::from_secs(5), |k: &u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(k * 2)
        });

        assert_eq!(cached(21), Ok((42, false)));
        assert_eq!(cached(21), Ok((42, true)));

        clock.advance(Duration::from_secs(6));
        assert_eq!(cached(21), Ok((42, false)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_with_ttl_cache_does_not_cache_errors() {
        let attempts = AtomicU32::new(0);
        let cached = with_ttl_cache(Duration::from_secs(60), |_: &&str| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("boom")
            } else {
                Ok("ok")
            }
        })
        .unwrap();

        assert_eq!(cached("k"), Err("boom"));
        assert_eq!(cached("k"), Ok(("ok", false)));
        assert_eq!(cached("k"), Ok(("ok", true)));
    }
}
