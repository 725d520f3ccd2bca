//! Mock implementations for testing.
//!
//! This module provides test doubles for infrastructure adapters,
//! enabling controlled testing of store and task behavior.

pub mod clock;
pub mod layer;
pub mod tracer;

pub use clock::MockClock;
pub use layer::{CapturedEvent, MockCaptureLayer};
pub use tracer::{MockTracer, TracedError};
