//! Key-value store with per-entry time-to-live.
//!
//! Values and deadlines live in two parallel sharded maps. Reads never return
//! an entry whose deadline has passed: an expired entry found by a read is
//! removed on the spot. A background sweeper reclaims entries nobody reads
//! again, following one [`SweepPolicy`] at a time.

use crate::application::metrics::StoreMetrics;
use crate::application::ports::{Clock, ConcurrentMap, Tracer};
use crate::application::sweeper::{
    self, SweepConfigError, SweepPolicy, SweeperState, DEFAULT_SWEEP_TICK,
};
use crate::application::task::{runtime_available, TaskHandle};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::storage::ShardedMap;
use crate::infrastructure::tracer::TracingTracer;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest representable time-to-live. Larger requests are capped here.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Error returned when a store cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// The sweep configuration is invalid
    Sweep(SweepConfigError),
    /// No Tokio runtime is available to run the sweeper on
    NoRuntime,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Sweep(e) => write!(f, "sweep configuration error: {}", e),
            BuildError::NoRuntime => {
                write!(f, "a Tokio runtime is required to run the background sweeper")
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Sweep(e) => Some(e),
            BuildError::NoRuntime => None,
        }
    }
}

impl From<SweepConfigError> for BuildError {
    fn from(e: SweepConfigError) -> Self {
        BuildError::Sweep(e)
    }
}

/// State shared between store handles and their sweeper.
pub(crate) struct TtlState<K, V>
where
    K: Eq + Hash,
{
    data: ShardedMap<K, V>,
    exp: ShardedMap<K, Instant>,
    clock: Arc<dyn Clock>,
    metrics: StoreMetrics,
}

impl<K, V> TtlState<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    pub(crate) fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    /// Remove every entry whose deadline has passed.
    pub(crate) fn sweep_expired(&self) -> usize {
        let now = self.clock.now();

        // Collect first: removing while iterating would deadlock on the shard lock.
        let mut expired = Vec::new();
        self.exp.range(|key, deadline| {
            if now > *deadline {
                expired.push(key.clone());
            }
            true
        });

        let mut removed = 0;
        for key in expired {
            // A concurrent store may have pushed the deadline out since the scan
            if self.exp.delete_if(&key, |deadline| now > *deadline) {
                self.data.delete(&key);
                removed += 1;
            }
        }

        self.metrics.record_swept(removed);
        removed
    }

    pub(crate) fn clear(&self) {
        self.data.clear();
        self.exp.clear();
        self.metrics.record_clear();
    }
}

struct SweeperSlot {
    handle: tokio::sync::Mutex<Option<TaskHandle>>,
    state: AtomicU8,
    tracer: Arc<dyn Tracer>,
}

/// Concurrent key-value store whose entries expire.
///
/// Cloning is cheap and every clone shares the same entries and sweeper.
/// The sweeper stops when the last clone is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use ephemera::TtlStore;
/// use std::time::Duration;
///
/// # async fn example() {
/// let sessions: TtlStore<String, u64> = TtlStore::new();
/// sessions.store("alice".to_string(), 42, Duration::from_secs(60));
///
/// assert_eq!(sessions.load(&"alice".to_string()), Some(42));
/// # }
/// ```
pub struct TtlStore<K, V>
where
    K: Eq + Hash,
{
    state: Arc<TtlState<K, V>>,
    sweeper: Arc<SweeperSlot>,
}

impl<K, V> Clone for TtlStore<K, V>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            sweeper: Arc::clone(&self.sweeper),
        }
    }
}

impl<K, V> fmt::Debug for TtlStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlStore")
            .field("entries", &self.state.data.len())
            .field(
                "sweeper",
                &SweeperState::from(self.sweeper.state.load(Ordering::Acquire)),
            )
            .finish()
    }
}

impl<K, V> TtlStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a store with an incremental sweeper ticking every second.
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime. Use
    /// [`builder`](Self::builder) to get an error instead.
    pub fn new() -> Self {
        Self::builder()
            .build()
            .expect("TtlStore::new must be called within a Tokio runtime")
    }

    /// Create a builder for configuring the store.
    pub fn builder() -> TtlStoreBuilder<K, V> {
        TtlStoreBuilder::new()
    }

    /// Insert or overwrite `key`, expiring `ttl` from now.
    pub fn store(&self, key: K, value: V, ttl: Duration) {
        // Deadline first narrows the window in which a concurrent sweep can
        // reap the fresh value; it does not close it.
        self.state.exp.store(key.clone(), self.deadline(ttl));
        self.state.data.store(key, value);
    }

    /// Get the value for `key` if it has not expired.
    ///
    /// An expired entry is removed before returning `None`.
    pub fn load(&self, key: &K) -> Option<V> {
        let now = self.state.clock.now();

        let Some(deadline) = self.state.exp.load(key) else {
            self.state.metrics.record_miss();
            return None;
        };

        if now > deadline {
            if self.state.exp.delete_if(key, |deadline| now > *deadline) {
                self.state.data.delete(key);
                self.state.metrics.record_expired();
            }
            self.state.metrics.record_miss();
            return None;
        }

        let value = self.state.data.load(key);
        match value {
            Some(_) => self.state.metrics.record_hit(),
            None => self.state.metrics.record_miss(),
        }
        value
    }

    /// Return the live value for `key`, or insert `value` if there is none.
    ///
    /// The deadline is pushed to `now + ttl` in both cases.
    ///
    /// # Returns
    /// The value now stored, and `true` if it was already present.
    pub fn load_or_store(&self, key: K, value: V, ttl: Duration) -> (V, bool) {
        let now = self.state.clock.now();

        // An expired leftover must not be handed back as a hit
        if self.state.exp.delete_if(&key, |deadline| now > *deadline) {
            self.state.data.delete(&key);
            self.state.metrics.record_expired();
        }

        self.state.exp.store(key.clone(), self.deadline(ttl));
        self.state.data.load_or_store(key, value)
    }

    /// Remove `key`. Removing an absent key is a no-op.
    pub fn delete(&self, key: &K) {
        self.state.data.delete(key);
        self.state.exp.delete(key);
    }

    /// Get the number of stored entries, expired ones not yet reclaimed included.
    pub fn len(&self) -> usize {
        self.state.data.len()
    }

    /// Check if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.data.is_empty()
    }

    /// Visit stored values until `visit` returns `false`.
    ///
    /// Deadlines are not consulted. `visit` runs under a shard lock and must
    /// not call back into this store.
    pub fn range<F>(&self, visit: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.state.data.range(visit);
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.state.clear();
    }

    /// Run one incremental sweep pass now.
    ///
    /// # Returns
    /// The number of expired entries removed.
    pub fn sweep_expired(&self) -> usize {
        self.state.sweep_expired()
    }

    /// Replace the running sweeper with one following `policy`.
    ///
    /// The previous sweeper has returned before the new one starts, so at
    /// most one sweeper runs even under concurrent calls.
    pub async fn set_sweep_policy(&self, policy: SweepPolicy) {
        let mut slot = self.sweeper.handle.lock().await;
        self.stop_current(&mut slot).await;

        let next = policy.state();
        let handle = sweeper::spawn(
            Arc::downgrade(&self.state),
            policy,
            Arc::clone(&self.sweeper.tracer),
        );
        *slot = Some(handle);
        self.sweeper.state.store(next as u8, Ordering::Release);
        debug!(state = ?next, "sweep policy switched");
    }

    /// Stop per-key sweeping and clear the whole store after every `interval()` sleep.
    ///
    /// `interval` is evaluated before each cycle, so the spacing may vary.
    pub async fn switch_to_fixed_clear<F>(&self, interval: F)
    where
        F: Fn() -> Duration + Send + Sync + 'static,
    {
        self.set_sweep_policy(SweepPolicy::fixed_clear(interval))
            .await;
    }

    /// Go back to removing expired entries every `tick`.
    ///
    /// # Errors
    /// Returns `SweepConfigError::ZeroTick` if `tick` is zero. The running
    /// sweeper is left untouched in that case.
    pub async fn switch_to_incremental(&self, tick: Duration) -> Result<(), SweepConfigError> {
        let policy = SweepPolicy::incremental(tick)?;
        self.set_sweep_policy(policy).await;
        Ok(())
    }

    /// Stop the background sweeper and wait for it to return.
    ///
    /// Reads keep evicting lazily. A later policy switch starts a new sweeper.
    pub async fn shutdown(&self) {
        let mut slot = self.sweeper.handle.lock().await;
        self.stop_current(&mut slot).await;
        self.sweeper
            .state
            .store(SweeperState::Stopped as u8, Ordering::Release);
    }

    /// Which sweeper is currently running.
    pub fn sweeper_state(&self) -> SweeperState {
        SweeperState::from(self.sweeper.state.load(Ordering::Acquire))
    }

    /// Get the store's usage counters.
    pub fn metrics(&self) -> &StoreMetrics {
        &self.state.metrics
    }

    async fn stop_current(&self, slot: &mut Option<TaskHandle>) {
        if let Some(current) = slot.take() {
            let name = current.name().to_string();
            if let Err(err) = current.shutdown().await {
                self.sweeper.tracer.error(&name, &err.to_string());
            }
        }
    }

    fn deadline(&self, ttl: Duration) -> Instant {
        let now = self.state.clock.now();
        now.checked_add(ttl.min(MAX_TTL))
            .or_else(|| now.checked_add(MAX_TTL))
            .unwrap_or(now)
    }
}

impl<K, V> Default for TtlStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TtlStore`].
pub struct TtlStoreBuilder<K, V> {
    sweep_tick: Duration,
    clock: Option<Arc<dyn Clock>>,
    tracer: Option<Arc<dyn Tracer>>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> fmt::Debug for TtlStoreBuilder<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlStoreBuilder")
            .field("sweep_tick", &self.sweep_tick)
            .field("clock", &self.clock)
            .field("tracer", &self.tracer)
            .finish()
    }
}

impl<K, V> TtlStoreBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            sweep_tick: DEFAULT_SWEEP_TICK,
            clock: None,
            tracer: None,
            _marker: PhantomData,
        }
    }

    /// Set the interval between incremental sweeps.
    ///
    /// Default: 1 second
    pub fn with_sweep_tick(mut self, tick: Duration) -> Self {
        self.sweep_tick = tick;
        self
    }

    /// Set the clock deadlines are measured against.
    ///
    /// Default: [`SystemClock`]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set where panics inside sweeps are reported.
    ///
    /// Default: [`TracingTracer`]
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Build the store and start its incremental sweeper.
    ///
    /// # Errors
    /// Returns `BuildError` if the sweep tick is zero or no Tokio runtime is running.
    pub fn build(self) -> Result<TtlStore<K, V>, BuildError> {
        let policy = SweepPolicy::incremental(self.sweep_tick)?;
        if !runtime_available() {
            return Err(BuildError::NoRuntime);
        }

        let tracer = self
            .tracer
            .unwrap_or_else(|| Arc::new(TracingTracer::new()));
        let state = Arc::new(TtlState {
            data: ShardedMap::new(),
            exp: ShardedMap::new(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            metrics: StoreMetrics::new(),
        });

        let initial = policy.state();
        let handle = sweeper::spawn(Arc::downgrade(&state), policy, Arc::clone(&tracer));

        Ok(TtlStore {
            state,
            sweeper: Arc::new(SweeperSlot {
                handle: tokio::sync::Mutex::new(Some(handle)),
                state: AtomicU8::new(initial as u8),
                tracer,
            }),
        })
    }
}
