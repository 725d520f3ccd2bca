//! Periodic sampling of a gauge into a bounded history.
//!
//! A [`HistorySampler`] reads a gauge once at start and then on every tick,
//! keeping the most recent samples in a [`CircularBuffer`]. The history can
//! be copied out or rendered as JSON for a metrics endpoint.

use crate::application::ports::{Clock, Tracer};
use crate::application::task::{runtime_available, ShutdownError, TaskHandle};
use crate::domain::ring::{BufferError, CircularBuffer};
use crate::infrastructure::clock::SystemClock;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const SAMPLER_TASK: &str = "history-sampler";

/// One gauge reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample<T> {
    /// Time of the reading, in milliseconds since the Unix epoch
    ///
    /// Anchored to the system time when the sampler started and advanced by
    /// the sampler's [`Clock`] from there.
    pub recorded_at_ms: u64,
    /// The reading
    pub value: T,
}

/// Error returned when a sampler cannot be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerError {
    /// History capacity was invalid
    Buffer(BufferError),
    /// Sampling interval was zero
    ZeroInterval,
    /// No Tokio runtime is available to run the sampling task on
    NoRuntime,
}

impl fmt::Display for SamplerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerError::Buffer(e) => write!(f, "invalid history buffer: {}", e),
            SamplerError::ZeroInterval => write!(f, "sampling interval must be greater than 0"),
            SamplerError::NoRuntime => {
                write!(f, "a Tokio runtime is required to run the sampling task")
            }
        }
    }
}

impl std::error::Error for SamplerError {}

impl From<BufferError> for SamplerError {
    fn from(e: BufferError) -> Self {
        SamplerError::Buffer(e)
    }
}

/// Bounded history of a periodically sampled gauge.
///
/// # Example
///
/// ```rust,no_run
/// use ephemera::{HistorySampler, TaskGroup, TracingTracer};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() {
/// let tracer = Arc::new(TracingTracer::new());
/// let group = TaskGroup::new("workers", tracer.clone());
///
/// // Keep the last 20 readings, one every 10 minutes
/// let gauge = group.clone();
/// let history = HistorySampler::start(Duration::from_secs(600), 20, tracer, move || {
///     gauge.active()
/// })
/// .unwrap();
///
/// println!("{}", history.to_json().unwrap());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HistorySampler<T> {
    samples: Arc<Mutex<CircularBuffer<Sample<T>>>>,
    stamps: Arc<Timestamps>,
    task: Arc<Mutex<Option<TaskHandle>>>,
}

/// Epoch-millisecond timestamps driven by a monotonic clock.
#[derive(Debug)]
struct Timestamps {
    clock: Arc<dyn Clock>,
    origin: Instant,
    origin_ms: u64,
}

impl Timestamps {
    fn new(clock: Arc<dyn Clock>) -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            origin: clock.now(),
            clock,
            origin_ms,
        }
    }

    fn now_ms(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.origin);
        self.origin_ms.saturating_add(elapsed.as_millis() as u64)
    }
}

impl<T> HistorySampler<T>
where
    T: Clone + Send + 'static,
{
    /// Sample `gauge` now and then every `every`, keeping `capacity` readings.
    ///
    /// A panicking gauge is reported to `tracer` and that reading is skipped.
    ///
    /// # Errors
    /// Returns `SamplerError` if `every` or `capacity` is zero, or no Tokio
    /// runtime is running.
    pub fn start<F>(
        every: Duration,
        capacity: usize,
        tracer: Arc<dyn Tracer>,
        gauge: F,
    ) -> Result<Self, SamplerError>
    where
        F: FnMut() -> T + Send + 'static,
    {
        Self::start_with_clock(
            every,
            capacity,
            tracer,
            Arc::new(SystemClock::new()),
            gauge,
        )
    }

    /// Like [`start`](Self::start), timestamping readings with `clock`.
    ///
    /// # Errors
    /// Same as [`start`](Self::start).
    pub fn start_with_clock<F>(
        every: Duration,
        capacity: usize,
        tracer: Arc<dyn Tracer>,
        clock: Arc<dyn Clock>,
        mut gauge: F,
    ) -> Result<Self, SamplerError>
    where
        F: FnMut() -> T + Send + 'static,
    {
        if every.is_zero() {
            return Err(SamplerError::ZeroInterval);
        }
        let samples = Arc::new(Mutex::new(CircularBuffer::new(capacity)?));
        if !runtime_available() {
            return Err(SamplerError::NoRuntime);
        }

        let stamps = Arc::new(Timestamps::new(clock));
        let writer = Arc::downgrade(&samples);
        let task_stamps = Arc::clone(&stamps);
        let handle = TaskHandle::periodic(SAMPLER_TASK, Duration::ZERO, every, tracer, move || {
            let value = gauge();
            if let Some(samples) = writer.upgrade() {
                push_sample(&samples, task_stamps.now_ms(), value);
            }
        });

        Ok(Self {
            samples,
            stamps,
            task: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Add a reading outside of the schedule.
    pub fn record(&self, value: T) {
        push_sample(&self.samples, self.stamps.now_ms(), value);
    }

    /// Copy of the history, oldest first.
    pub fn snapshot(&self) -> Vec<Sample<T>> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .range()
    }

    /// Number of readings currently kept.
    pub fn len(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .size()
    }

    /// Check if no reading has been taken yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop sampling and wait for the task to return. The history is kept.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the sampling task did not stop cleanly.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        }
    }
}

impl<T> HistorySampler<T>
where
    T: Clone + Send + Serialize + 'static,
{
    /// Render the history as a JSON array, oldest first.
    ///
    /// # Errors
    /// Returns the serializer error if a value cannot be represented as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.snapshot())
    }
}

fn push_sample<T>(samples: &Mutex<CircularBuffer<Sample<T>>>, recorded_at_ms: u64, value: T) {
    samples
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Sample {
            recorded_at_ms,
            value,
        });
}
