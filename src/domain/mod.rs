//! Domain layer - pure data structures with no runtime dependencies.
//!
//! This layer contains the core algorithms shared by the stores:
//! - Token bucket admission policy
//! - Fixed-capacity circular sample buffer
//!
//! All types in this layer are synchronous, clock-agnostic and easily testable.

pub mod policy;
pub mod ring;
