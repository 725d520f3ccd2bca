//! Cancellable background tasks.
//!
//! Every store that reclaims state in the background owns exactly one
//! [`TaskHandle`]. A handle pairs a cancellation signal with the task's join
//! handle, so stopping a task means signalling it and then waiting until it
//! has actually returned.
//!
//! [`TaskGroup`] tracks fire-and-forget work, reports panics through the
//! injected [`Tracer`] and lets shutdown code wait for outstanding tasks.

use crate::application::ports::Tracer;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// First-run delay used by [`TaskHandle::periodic_default`].
pub const DEFAULT_FIRST_DELAY: Duration = Duration::from_secs(3);

/// Error returned when a background task does not stop cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The task panicked instead of returning
    Panicked {
        /// Name of the task
        task: String,
    },
    /// The task was aborted by the runtime before it could finish
    Aborted {
        /// Name of the task
        task: String,
    },
    /// Tasks were still running when the wait deadline elapsed
    Timeout {
        /// Number of tasks still running
        pending: usize,
    },
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Panicked { task } => write!(f, "task {} panicked", task),
            ShutdownError::Aborted { task } => write!(f, "task {} was aborted", task),
            ShutdownError::Timeout { pending } => {
                write!(f, "timed out with {} task(s) still running", pending)
            }
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Cancellation signal handed to a background task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once cancellation is requested or the owning handle is dropped.
    pub async fn cancelled(&mut self) {
        // An error means the sender is gone, which is cancellation too.
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Handle owning a cancellable background task.
///
/// Dropping the handle also signals cancellation; [`shutdown`](Self::shutdown)
/// additionally waits for the task to return.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn a task on the current Tokio runtime.
    ///
    /// The task receives a [`Shutdown`] it must select on.
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (cancel, rx) = watch::channel(false);
        let join = tokio::spawn(task(Shutdown { rx }));
        tracing::debug!(task = %name, "background task started");
        Self { name, cancel, join }
    }

    /// Spawn a task running `job` after `first`, then every `every`, until cancelled.
    ///
    /// A panic inside `job` is reported to `tracer` and the schedule continues.
    ///
    /// # Panics
    /// Panics if `every` is zero or if called outside of a Tokio runtime.
    pub fn periodic<F>(
        name: impl Into<String>,
        first: Duration,
        every: Duration,
        tracer: Arc<dyn Tracer>,
        mut job: F,
    ) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        Self::spawn(name, move |mut shutdown| async move {
            let start = tokio::time::Instant::now() + first;
            let mut ticker = tokio::time::interval_at(start, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        run_guarded(&task_name, tracer.as_ref(), &mut job);
                    }
                }
            }
            tracing::debug!(task = %task_name, "background task stopped");
        })
    }

    /// Like [`periodic`](Self::periodic) with the default 3 second first delay.
    pub fn periodic_default<F>(
        name: impl Into<String>,
        every: Duration,
        tracer: Arc<dyn Tracer>,
        job: F,
    ) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::periodic(name, DEFAULT_FIRST_DELAY, every, tracer, job)
    }

    /// Name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the task has returned.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal cancellation and wait for the task to return.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the task panicked or was aborted.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        // Fails only when the task already returned and dropped its receiver.
        let _ = self.cancel.send(true);

        match self.join.await {
            Ok(()) => Ok(()),
            Err(err) if err.is_panic() => Err(ShutdownError::Panicked { task: self.name }),
            Err(_) => Err(ShutdownError::Aborted { task: self.name }),
        }
    }
}

/// Group of tracked fire-and-forget tasks.
///
/// # Example
///
/// ```rust,no_run
/// use ephemera::{TaskGroup, TracingTracer};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() {
/// let group = TaskGroup::new("jobs", Arc::new(TracingTracer::new()));
/// group.spawn(async { /* work */ });
/// group.spawn(async { panic!("reported, not propagated") });
///
/// group.wait_timeout(Duration::from_secs(3)).await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

#[derive(Debug)]
struct GroupInner {
    name: String,
    tracer: Arc<dyn Tracer>,
    // Count of unfinished tasks; waiters subscribe and watch it reach zero.
    active: watch::Sender<usize>,
}

impl TaskGroup {
    /// Create an empty group whose panics are reported to `tracer`.
    pub fn new(name: impl Into<String>, tracer: Arc<dyn Tracer>) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                tracer,
                active,
            }),
        }
    }

    /// Run `fut` in the background.
    ///
    /// A panic in `fut` is reported to the tracer and never reaches the caller.
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn<Fut>(&self, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.active.send_modify(|n| *n += 1);
        let inner = Arc::clone(&self.inner);

        // The supervisor outlives the work, so panics are reported even if
        // nobody ever waits on the group.
        tokio::spawn(async move {
            if let Err(err) = tokio::spawn(fut).await {
                if err.is_panic() {
                    let message = panic_message(err.into_panic().as_ref());
                    inner
                        .tracer
                        .error(&inner.name, &format!("task panicked: {}", message));
                }
            }
            inner.active.send_modify(|n| *n -= 1);
        });
    }

    /// Number of tasks that have not finished yet.
    pub fn active(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Wait until every task spawned so far, and any spawned meanwhile, has finished.
    ///
    /// Cancelling a wait leaves the group untouched, so a later call still
    /// waits for the same tasks.
    pub async fn wait(&self) {
        let mut active = self.inner.active.subscribe();
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = active.wait_for(|n| *n == 0).await;
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Tasks still running at the deadline keep running in the background.
    ///
    /// # Errors
    /// Returns `ShutdownError::Timeout` if tasks were still running.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), ShutdownError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ShutdownError::Timeout {
                pending: self.active(),
            })
    }
}

/// Run `job`, reporting a panic to `tracer` instead of unwinding further.
pub(crate) fn run_guarded<R>(
    task: &str,
    tracer: &dyn Tracer,
    job: impl FnOnce() -> R,
) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracer.error(task, &format!("panicked: {}", message));
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// True if a Tokio runtime is available to spawn background tasks on.
pub(crate) fn runtime_available() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}
