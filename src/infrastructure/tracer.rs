//! Tracer adapter emitting through the `tracing` ecosystem.

use crate::application::ports::Tracer;

/// Default [`Tracer`] that forwards background failures to `tracing::error!`.
///
/// Whatever subscriber the application installs decides where the events end up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl TracingTracer {
    /// Create a new tracing-backed tracer.
    pub fn new() -> Self {
        Self
    }
}

impl Tracer for TracingTracer {
    fn error(&self, task: &str, message: &str) {
        tracing::error!(task = task, "{}", message);
    }
}
