//! Integration tests for TTL store expiry behavior.

use ephemera::infrastructure::mocks::{MockClock, MockTracer};
use ephemera::TtlStore;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn store_with_clock(clock: &MockClock, tick: Duration) -> TtlStore<String, String> {
    TtlStore::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_tracer(Arc::new(MockTracer::new()))
        .with_sweep_tick(tick)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_entry_expires_after_ttl_in_real_time() {
    let store: TtlStore<String, String> = TtlStore::new();

    store.store("a".to_string(), "1".to_string(), Duration::from_secs(1));
    assert_eq!(store.load(&"a".to_string()), Some("1".to_string()));

    tokio::time::sleep(Duration::from_millis(1050)).await;
    assert_eq!(store.load(&"a".to_string()), None);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_reclaims_unread_entries_within_a_tick() {
    let clock = MockClock::starting_now();
    let store = store_with_clock(&clock, Duration::from_secs(1));

    store.store("stale".to_string(), "x".to_string(), Duration::from_millis(500));
    store.store("fresh".to_string(), "y".to_string(), Duration::from_secs(60));
    clock.advance(Duration::from_millis(600));

    // Nobody reads "stale"; the next tick must remove it
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(store.len(), 1);
    assert_eq!(store.metrics().swept(), 1);
    assert_eq!(store.metrics().expired(), 0);
    assert_eq!(store.load(&"fresh".to_string()), Some("y".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_keeps_live_entries() {
    let clock = MockClock::starting_now();
    let store = store_with_clock(&clock, Duration::from_millis(100));

    for i in 0..10 {
        store.store(i.to_string(), i.to_string(), Duration::from_secs(5));
    }

    // Many ticks pass, but the clock says nothing has expired
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(store.len(), 10);
}

#[tokio::test]
async fn test_lazy_eviction_happens_on_read() {
    let clock = MockClock::starting_now();
    // Tick long enough that the sweeper never runs during the test
    let store = store_with_clock(&clock, Duration::from_secs(3600));

    store.store("a".to_string(), "1".to_string(), Duration::from_secs(1));
    clock.advance(Duration::from_secs(2));

    // Still physically present until something touches it
    assert_eq!(store.len(), 1);
    assert_eq!(store.load(&"a".to_string()), None);
    assert_eq!(store.len(), 0);

    let snapshot = store.metrics().snapshot();
    assert_eq!(snapshot.expired, 1);
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.hits, 0);
}

#[tokio::test]
async fn test_delete_twice_is_a_noop() {
    let store: TtlStore<String, String> = TtlStore::new();
    store.store("a".to_string(), "1".to_string(), Duration::from_secs(60));

    store.delete(&"a".to_string());
    store.delete(&"a".to_string());

    assert_eq!(store.load(&"a".to_string()), None);
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_and_readers() {
    let store: TtlStore<String, usize> = TtlStore::new();
    let mut handles = vec![];

    for t in 0..8 {
        let store = store.clone();
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                let key = format!("k{}", i % 50);
                store.store(key.clone(), t * 1000 + i, Duration::from_secs(60));
                assert!(store.load(&key).is_some());
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), 50);
}

#[tokio::test]
async fn test_load_or_store_first_writer_wins() {
    let store: TtlStore<String, u32> = TtlStore::new();

    let (first, loaded) = store.load_or_store("k".to_string(), 1, Duration::from_secs(60));
    assert_eq!((first, loaded), (1, false));

    let (second, loaded) = store.load_or_store("k".to_string(), 2, Duration::from_secs(60));
    assert_eq!((second, loaded), (1, true));
}
