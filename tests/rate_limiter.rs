//! Integration tests for the identity rate limiter registry.

use ephemera::infrastructure::mocks::{MockClock, MockTracer};
use ephemera::{IdentityRegistry, RegistryConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn registry(clock: &MockClock, rate: f64, burst: f64) -> IdentityRegistry {
    IdentityRegistry::new(
        RegistryConfig::new(rate, burst)
            .with_clock(Arc::new(clock.clone()))
            .with_tracer(Arc::new(MockTracer::new())),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_idle_identity_is_evicted_and_starts_fresh() {
    let clock = MockClock::starting_now();
    // No refill, so only eviction can restore tokens
    let registry = registry(&clock, 0.0, 3.0);

    for _ in 0..3 {
        assert!(registry.allow("1.2.3.4"));
    }
    assert!(!registry.allow("1.2.3.4"));

    clock.advance(Duration::from_secs(181));
    // The cleanup task runs every 30 seconds
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!registry.contains("1.2.3.4"));
    assert!(registry.is_empty());

    for _ in 0..3 {
        assert!(registry.allow("1.2.3.4"));
    }
    assert!(!registry.allow("1.2.3.4"));
}

#[tokio::test(start_paused = true)]
async fn test_active_identity_survives_cleanup() {
    let clock = MockClock::starting_now();
    let registry = registry(&clock, 1.0, 1.0);

    registry.get("busy");
    registry.get("quiet");

    // "busy" keeps coming back, "quiet" never does
    for _ in 0..8 {
        clock.advance(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(30)).await;
        registry.get("busy");
    }

    assert!(registry.contains("busy"));
    assert!(!registry.contains("quiet"));
}

#[tokio::test]
async fn test_custom_idle_timeout() {
    let clock = MockClock::starting_now();
    let registry = IdentityRegistry::new(
        RegistryConfig::new(1.0, 1.0)
            .with_idle_timeout(Duration::from_secs(10))
            .with_clock(Arc::new(clock.clone())),
    )
    .unwrap();

    registry.get("a");
    clock.advance(Duration::from_secs(11));
    assert_eq!(registry.cleanup(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_is_shared_across_threads() {
    let clock = MockClock::starting_now();
    let registry = registry(&clock, 0.0, 100.0);
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                for _ in 0..50 {
                    if registry.allow("10.0.0.1") {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 100);
    assert_eq!(registry.len(), 1);
}
