//! # ephemera
//!
//! Self-evicting, concurrency-safe stores for short-lived in-process state.
//!
//! Web services accumulate small pieces of state that should disappear on
//! their own: cached lookups, per-client rate limiters, recent gauge readings.
//! This crate provides stores that reclaim such state without callers having
//! to remember to delete it, and that are safe to share across threads and
//! async tasks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ephemera::{IdentityRegistry, RegistryConfig, TtlStore};
//! use std::time::Duration;
//!
//! # async fn example() {
//! // Entries expire after their TTL; a background sweeper reclaims them
//! let sessions: TtlStore<String, String> = TtlStore::new();
//! sessions.store("token".to_string(), "alice".to_string(), Duration::from_secs(30));
//! assert_eq!(sessions.load(&"token".to_string()), Some("alice".to_string()));
//!
//! // One token bucket per client: 1 req/s, bursts of 5, idle clients forgotten after 3 min
//! let limiter = IdentityRegistry::new(RegistryConfig::new(1.0, 5.0)).unwrap();
//! if !limiter.allow("203.0.113.7") {
//!     // reject with 429
//! }
//! # }
//! ```
//!
//! ## Features
//!
//! ### Stores
//! - **Concurrent map**: sharded `DashMap` behind the [`ConcurrentMap`] port
//! - **TTL store**: per-entry deadlines, lazy eviction on read, background sweeping
//! - **Identity rate limiter registry**: token bucket per identity with idle eviction
//! - **Circular buffer**: fixed-capacity history of the last N samples
//!
//! ### Sweep Policies
//! A [`TtlStore`] runs exactly one sweeper at a time:
//! - **Incremental** (default): every tick, remove each entry whose deadline has passed
//! - **Fixed clear**: drop everything on a schedule computed by a closure
//!
//! Switching policy stops the running sweeper and waits for it to return
//! before the new one starts:
//!
//! ```rust,no_run
//! # use ephemera::TtlStore;
//! # use std::time::Duration;
//! # async fn example() {
//! let cache: TtlStore<u64, Vec<u8>> = TtlStore::new();
//!
//! // Flush the whole cache every 10 minutes instead of per-key sweeping
//! cache.switch_to_fixed_clear(|| Duration::from_secs(600)).await;
//! # }
//! ```
//!
//! ### Memoization
//! [`with_cache`] and [`with_ttl_cache`] wrap a fallible computation. Only
//! successful results are cached, and each call reports whether it was a hit:
//!
//! ```rust
//! use ephemera::with_cache;
//!
//! let lookup = with_cache(|id: &u32| {
//!     if *id == 0 {
//!         Err("no such user")
//!     } else {
//!         Ok(format!("user-{}", id))
//!     }
//! });
//!
//! assert_eq!(lookup(7), Ok(("user-7".to_string(), false)));
//! assert_eq!(lookup(7), Ok(("user-7".to_string(), true)));
//! assert_eq!(lookup(0), Err("no such user"));
//! ```
//!
//! Concurrent misses on the same key are not coalesced: each one runs the
//! computation.
//!
//! ### Background Work
//! - [`TaskHandle`]: cancellable task, stopped by signalling and then joining
//! - [`TaskGroup`]: tracked fire-and-forget tasks with a bounded wait
//! - [`HistorySampler`]: periodic gauge readings kept in a [`CircularBuffer`]
//! - [`Timing`]: scope guard logging slow sections
//!
//! Panics inside background work never take the process down. They are caught
//! and reported to the [`Tracer`] given at construction, which by default
//! forwards to `tracing::error!`.
//!
//! ## Runtime
//!
//! Stores with background maintenance need a Tokio runtime when they are
//! created. Builders report a missing runtime as an error; `new()`
//! constructors panic instead.
//!
//! Dropping the last handle to a store stops its background task.
//! Call `shutdown()` to stop it and wait for it deterministically.
//!
//! ## Observability
//!
//! ```rust,no_run
//! # use ephemera::TtlStore;
//! # async fn example() {
//! # let store: TtlStore<String, String> = TtlStore::new();
//! let snapshot = store.metrics().snapshot();
//! println!(
//!     "hit rate {:.1}%, {} expired on read, {} swept",
//!     snapshot.hit_rate() * 100.0,
//!     snapshot.expired,
//!     snapshot.swept,
//! );
//! # }
//! ```
//!
//! | Counter | Meaning |
//! |---------|---------|
//! | `hits` / `misses` | Loads that did / did not return a value |
//! | `expired` | Entries removed because a load found them past their deadline |
//! | `swept` | Entries removed by incremental sweeps |
//! | `cleared` | Full clears, manual or scheduled |
//! | `active_sweepers` | Sweeper tasks running right now (0 or 1 outside a switch) |

// Domain layer - pure data structures
pub mod domain;

// Application layer - stores and background work
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    policy::{PolicyDecision, PolicyError, RateLimitPolicy, TokenBucketPolicy},
    ring::{BufferError, CircularBuffer},
};

pub use application::{
    memo::{with_cache, with_ttl_cache, with_ttl_cache_in},
    metrics::{MetricsSnapshot, StoreMetrics},
    ports::{Clock, ConcurrentMap, Tracer},
    registry::{
        IdentityRegistry, LimiterHandle, RegistryConfig, RegistryError,
        DEFAULT_CLEANUP_INTERVAL, DEFAULT_IDLE_TIMEOUT,
    },
    sampler::{HistorySampler, Sample, SamplerError},
    sweeper::{IntervalFn, SweepConfigError, SweepPolicy, SweeperState, DEFAULT_SWEEP_TICK},
    task::{Shutdown, ShutdownError, TaskGroup, TaskHandle},
    timing::Timing,
    ttl_store::{BuildError, TtlStore, TtlStoreBuilder, MAX_TTL},
};

pub use infrastructure::{clock::SystemClock, storage::ShardedMap, tracer::TracingTracer};
