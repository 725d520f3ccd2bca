//! Background sweep policies for TTL stores.
//!
//! A store runs exactly one sweeper at a time:
//!
//! - **Incremental**: every tick, remove each entry whose deadline has passed.
//! - **Fixed clear**: sleep for an interval computed before every cycle, then
//!   drop everything regardless of deadlines.
//!
//! Sweepers hold only a weak reference to store state. Once the last store
//! handle is dropped the task exits at its next wake-up.

use crate::application::ports::Tracer;
use crate::application::task::{run_guarded, Shutdown, TaskHandle};
use crate::application::ttl_store::TtlState;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Tick used by the incremental sweeper unless configured otherwise.
pub const DEFAULT_SWEEP_TICK: Duration = Duration::from_secs(1);

/// Shortest sleep between two fixed clears. A zero interval would spin.
pub const MIN_CLEAR_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) const INCREMENTAL_TASK: &str = "ttl-sweeper";
pub(crate) const FIXED_CLEAR_TASK: &str = "ttl-clearer";

/// Computes the sleep before the next fixed clear. Evaluated once per cycle.
pub type IntervalFn = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Which sweeper, if any, a store is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    /// Expired entries are removed one by one every tick
    IncrementalSweep = 0,
    /// The whole store is cleared on a schedule
    FixedClear = 1,
    /// No sweeper is running; reads still evict lazily
    Stopped = 2,
}

impl From<u8> for SweeperState {
    fn from(value: u8) -> Self {
        match value {
            0 => SweeperState::IncrementalSweep,
            1 => SweeperState::FixedClear,
            _ => SweeperState::Stopped,
        }
    }
}

/// Error returned for an unusable sweep configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepConfigError {
    /// The incremental tick was zero
    ZeroTick,
}

impl fmt::Display for SweepConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepConfigError::ZeroTick => write!(f, "sweep tick must be greater than 0"),
        }
    }
}

impl std::error::Error for SweepConfigError {}

/// Policy a sweeper task follows.
#[derive(Clone)]
pub enum SweepPolicy {
    /// Remove expired entries every `tick`
    Incremental {
        /// Time between passes
        tick: Duration,
    },
    /// Clear the store after every `interval()` sleep
    FixedClear {
        /// Sleep before each clear
        interval: IntervalFn,
    },
}

impl SweepPolicy {
    /// Incremental sweeping every `tick`.
    ///
    /// # Errors
    /// Returns `SweepConfigError::ZeroTick` if `tick` is zero.
    pub fn incremental(tick: Duration) -> Result<Self, SweepConfigError> {
        if tick.is_zero() {
            return Err(SweepConfigError::ZeroTick);
        }
        Ok(SweepPolicy::Incremental { tick })
    }

    /// Full clears spaced by whatever `interval` returns at the start of each cycle.
    pub fn fixed_clear<F>(interval: F) -> Self
    where
        F: Fn() -> Duration + Send + Sync + 'static,
    {
        SweepPolicy::FixedClear {
            interval: Arc::new(interval),
        }
    }

    /// State a store reports while this policy runs.
    pub fn state(&self) -> SweeperState {
        match self {
            SweepPolicy::Incremental { .. } => SweeperState::IncrementalSweep,
            SweepPolicy::FixedClear { .. } => SweeperState::FixedClear,
        }
    }
}

impl fmt::Debug for SweepPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepPolicy::Incremental { tick } => f
                .debug_struct("Incremental")
                .field("tick", tick)
                .finish(),
            SweepPolicy::FixedClear { .. } => f
                .debug_struct("FixedClear")
                .field("interval", &"<fn>")
                .finish(),
        }
    }
}

/// Start a sweeper for `state` following `policy`.
pub(crate) fn spawn<K, V>(
    state: Weak<TtlState<K, V>>,
    policy: SweepPolicy,
    tracer: Arc<dyn Tracer>,
) -> TaskHandle
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    match policy {
        SweepPolicy::Incremental { tick } => TaskHandle::spawn(INCREMENTAL_TASK, move |shutdown| {
            incremental(state, tick, tracer, shutdown)
        }),
        SweepPolicy::FixedClear { interval } => {
            TaskHandle::spawn(FIXED_CLEAR_TASK, move |shutdown| {
                fixed_clear(state, interval, tracer, shutdown)
            })
        }
    }
}

async fn incremental<K, V>(
    state: Weak<TtlState<K, V>>,
    tick: Duration,
    tracer: Arc<dyn Tracer>,
    mut shutdown: Shutdown,
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let _active = match state.upgrade() {
        Some(state) => state.metrics().sweeper_started(),
        None => return,
    };

    // First pass one tick after start, not immediately
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(state) = state.upgrade() else { break };
                if let Some(removed) =
                    run_guarded(INCREMENTAL_TASK, tracer.as_ref(), || state.sweep_expired())
                {
                    if removed > 0 {
                        trace!(removed, "swept expired entries");
                    }
                }
            }
        }
    }

    debug!(task = INCREMENTAL_TASK, "sweeper stopped");
}

async fn fixed_clear<K, V>(
    state: Weak<TtlState<K, V>>,
    interval: IntervalFn,
    tracer: Arc<dyn Tracer>,
    mut shutdown: Shutdown,
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let _active = match state.upgrade() {
        Some(state) => state.metrics().sweeper_started(),
        None => return,
    };

    loop {
        let wait = run_guarded(FIXED_CLEAR_TASK, tracer.as_ref(), interval.as_ref())
            .unwrap_or(DEFAULT_SWEEP_TICK)
            .max(MIN_CLEAR_INTERVAL);

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {
                let Some(state) = state.upgrade() else { break };
                if run_guarded(FIXED_CLEAR_TASK, tracer.as_ref(), || state.clear()).is_some() {
                    trace!(after = ?wait, "cleared store");
                }
            }
        }
    }

    debug!(task = FIXED_CLEAR_TASK, "sweeper stopped");
}
