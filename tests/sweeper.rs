//! Integration tests for sweep policies and their switching.

use ephemera::infrastructure::mocks::{MockClock, MockTracer};
use ephemera::{Clock, SweeperState, TtlStore};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Let spawned tasks run up to their next await point.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn store_with_clock(clock: &MockClock, tick: Duration) -> TtlStore<u32, u32> {
    TtlStore::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_tracer(Arc::new(MockTracer::new()))
        .with_sweep_tick(tick)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_policy_switches_never_overlap() {
    let store: TtlStore<u32, u32> = TtlStore::builder()
        .with_sweep_tick(Duration::from_millis(100))
        .build()
        .unwrap();
    settle().await;
    assert_eq!(store.metrics().active_sweepers(), 1);

    for i in 0..20 {
        if i % 2 == 0 {
            store
                .switch_to_fixed_clear(|| Duration::from_secs(3600))
                .await;
            assert_eq!(store.sweeper_state(), SweeperState::FixedClear);
        } else {
            store
                .switch_to_incremental(Duration::from_millis(100))
                .await
                .unwrap();
            assert_eq!(store.sweeper_state(), SweeperState::IncrementalSweep);
        }

        // The previous sweeper returned before the switch did
        assert!(store.metrics().active_sweepers() <= 1);
        settle().await;
        assert_eq!(store.metrics().active_sweepers(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_switches_leave_one_sweeper() {
    let store: TtlStore<u32, u32> = TtlStore::new();
    let mut tasks = vec![];

    for i in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                store.switch_to_fixed_clear(|| Duration::from_secs(60)).await;
            } else {
                store
                    .switch_to_incremental(Duration::from_secs(1))
                    .await
                    .unwrap();
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.metrics().active_sweepers(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_clear_ignores_deadlines_and_clears_everything() {
    let clock = MockClock::starting_now();
    let store = store_with_clock(&clock, Duration::from_secs(1));

    store
        .switch_to_fixed_clear(|| Duration::from_secs(10))
        .await;

    store.store(1, 1, Duration::from_millis(1));
    store.store(2, 2, Duration::from_secs(3600));
    clock.advance(Duration::from_secs(1));

    // An incremental sweeper would have removed key 1 by now
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.len(), 2);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(store.is_empty());
    assert_eq!(store.metrics().cleared(), 1);
    assert_eq!(store.metrics().swept(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_clear_interval_is_reevaluated_each_cycle() {
    let store: TtlStore<u32, u32> = TtlStore::new();
    let cycle = Arc::new(AtomicU64::new(0));
    let next = Arc::clone(&cycle);

    // 1s, then 2s, then 3s...
    store
        .switch_to_fixed_clear(move || Duration::from_secs(next.fetch_add(1, Ordering::SeqCst) + 1))
        .await;

    // Clears at t=1, t=3 and t=6
    tokio::time::sleep(Duration::from_millis(6500)).await;
    assert_eq!(store.metrics().cleared(), 3);
    assert_eq!(cycle.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_switch_back_to_incremental() {
    let clock = MockClock::starting_now();
    let store = store_with_clock(&clock, Duration::from_secs(1));

    store
        .switch_to_fixed_clear(|| Duration::from_secs(3600))
        .await;
    store
        .switch_to_incremental(Duration::from_millis(200))
        .await
        .unwrap();

    store.store(1, 1, Duration::from_millis(100));
    store.store(2, 2, Duration::from_secs(60));
    clock.advance(Duration::from_millis(150));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(store.len(), 1);
    assert_eq!(store.metrics().cleared(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_sweeping_but_not_lazy_eviction() {
    let clock = MockClock::starting_now();
    let store = store_with_clock(&clock, Duration::from_millis(100));
    settle().await;

    store.shutdown().await;
    assert_eq!(store.sweeper_state(), SweeperState::Stopped);
    assert_eq!(store.metrics().active_sweepers(), 0);

    store.store(1, 1, Duration::from_millis(10));
    clock.advance(Duration::from_secs(1));
    tokio::time::sleep(Duration::from_secs(1)).await;

    // No sweeper ran, but a read still refuses the expired entry
    assert_eq!(store.len(), 1);
    assert_eq!(store.load(&1), None);
    assert_eq!(store.len(), 0);

    // Shutting down twice is harmless
    store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropping_last_handle_stops_sweeper() {
    let store: TtlStore<u32, u32> = TtlStore::new();
    let metrics = store.metrics().clone();
    let clone = store.clone();
    settle().await;
    assert_eq!(metrics.active_sweepers(), 1);

    drop(store);
    settle().await;
    assert_eq!(metrics.active_sweepers(), 1);

    drop(clone);
    settle().await;
    assert_eq!(metrics.active_sweepers(), 0);
}

/// Clock whose readings panic on demand.
#[derive(Debug)]
struct FlakyClock {
    failing: AtomicBool,
    start: Instant,
}

impl Clock for FlakyClock {
    fn now(&self) -> Instant {
        if self.failing.load(Ordering::SeqCst) {
            panic!("clock unavailable");
        }
        self.start
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_sweep_is_reported_and_loop_continues() {
    let tracer = MockTracer::new();
    let clock = Arc::new(FlakyClock {
        failing: AtomicBool::new(true),
        start: Instant::now(),
    });

    let store: TtlStore<u32, u32> = TtlStore::builder()
        .with_clock(clock.clone())
        .with_tracer(Arc::new(tracer.clone()))
        .with_sweep_tick(Duration::from_secs(1))
        .build()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(tracer.count(), 2);
    assert!(tracer
        .reports()
        .iter()
        .all(|r| r.task == "ttl-sweeper" && r.message.contains("clock unavailable")));

    // Still alive after the panics
    clock.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(tracer.count(), 2);
    assert_eq!(store.metrics().active_sweepers(), 1);
}
