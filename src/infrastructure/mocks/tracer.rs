//! Mock tracer for testing.

use crate::application::ports::Tracer;
use std::sync::{Arc, Mutex};

/// A report captured by [`MockTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedError {
    pub task: String,
    pub message: String,
}

/// Tracer that records every report in memory.
///
/// Clones share the same record, so a test can inject one clone and inspect
/// the other.
#[derive(Debug, Clone, Default)]
pub struct MockTracer {
    reports: Arc<Mutex<Vec<TracedError>>>,
}

impl MockTracer {
    /// Create a new, empty mock tracer.
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports received so far.
    pub fn reports(&self) -> Vec<TracedError> {
        self.reports
            .lock()
            .expect("MockTracer mutex poisoned - a test thread panicked while holding the lock")
            .clone()
    }

    /// Number of reports received so far.
    pub fn count(&self) -> usize {
        self.reports
            .lock()
            .expect("MockTracer mutex poisoned - a test thread panicked while holding the lock")
            .len()
    }
}

impl Tracer for MockTracer {
    fn error(&self, task: &str, message: &str) {
        self.reports
            .lock()
            .expect("MockTracer mutex poisoned - a test thread panicked while holding the lock")
            .push(TracedError {
                task: task.to_string(),
                message: message.to_string(),
            });
    }
}
