//! Scoped execution timing.

use std::panic::Location;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Guard logging how long a scope took when it is dropped.
///
/// Scopes slower than the limit are logged at `ERROR`, others at `DEBUG`.
/// The log carries the location where the guard was started.
///
/// # Example
///
/// ```rust
/// use ephemera::Timing;
/// use std::time::Duration;
///
/// fn load_dashboard() {
///     let _timing = Timing::start(Duration::from_millis(200));
///     // ... slow work ...
/// }
/// # load_dashboard();
/// ```
#[derive(Debug)]
#[must_use = "the scope is timed until the guard is dropped"]
pub struct Timing {
    started: Instant,
    limit: Duration,
    caller: &'static Location<'static>,
}

impl Timing {
    /// Start timing the enclosing scope.
    #[track_caller]
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
            caller: Location::caller(),
        }
    }

    /// Time elapsed since the guard was started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for Timing {
    fn drop(&mut self) {
        let cost = self.started.elapsed();
        if cost > self.limit {
            error!(cost = ?cost, limit = ?self.limit, caller = %self.caller, "timing");
        } else {
            debug!(cost = ?cost, caller = %self.caller, "timing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockCaptureLayer;
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_fast_scope_logs_debug() {
        let capture = MockCaptureLayer::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());

        tracing::subscriber::with_default(subscriber, || {
            let _timing = Timing::start(Duration::from_secs(3600));
        });

        let events = capture.get_captured();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::DEBUG);
        assert_eq!(events[0].message, "timing");
        assert!(events[0].field("caller").unwrap().contains("timing.rs"));
    }

    #[test]
    fn test_slow_scope_logs_error() {
        let capture = MockCaptureLayer::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());

        tracing::subscriber::with_default(subscriber, || {
            let timing = Timing::start(Duration::ZERO);
            std::thread::sleep(Duration::from_millis(2));
            assert!(timing.elapsed() >= Duration::from_millis(2));
        });

        let events = capture.get_captured();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::ERROR);
        assert!(events[0].field("limit").is_some());
    }
}
