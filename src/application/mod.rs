//! Application layer - orchestration of domain logic.
//!
//! This layer builds the stores and their background maintenance:
//! - TTL store with lazy eviction and a switchable sweeper
//! - Memoizing wrappers over fallible computations
//! - Identity rate limiter registry with idle cleanup
//! - Cancellable tasks, task groups and gauge sampling
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod memo;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod sampler;
pub mod sweeper;
pub mod task;
pub mod timing;
pub mod ttl_store;
