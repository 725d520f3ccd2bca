//! Per-identity rate limiters with idle eviction.
//!
//! Each identity (typically a client IP) gets its own token bucket the first
//! time it is seen. Every lookup refreshes the identity's last-seen time,
//! whether or not the request is then admitted. A periodic cleanup drops
//! identities idle for longer than the configured timeout, so a returning
//! client starts again with a full bucket.
//!
//! The registry map is guarded by a single mutex held only for the lookup.
//! Token checks happen afterwards under each limiter's own lock.

use crate::application::ports::{Clock, Tracer};
use crate::application::task::{runtime_available, ShutdownError, TaskHandle};
use crate::domain::policy::{PolicyError, RateLimitPolicy, TokenBucketPolicy};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::tracer::TracingTracer;
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default time between two cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Default idle time after which an identity is forgotten.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3 * 60);

const CLEANUP_TASK: &str = "limiter-cleanup";

/// Error returned when a registry cannot be created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegistryError {
    /// Rate or burst are not usable for a token bucket
    Policy(PolicyError),
    /// Cleanup interval was zero
    ZeroCleanupInterval,
    /// Idle timeout was zero
    ZeroIdleTimeout,
    /// No Tokio runtime is available to run the cleanup task on
    NoRuntime,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Policy(e) => write!(f, "invalid limiter parameters: {}", e),
            RegistryError::ZeroCleanupInterval => {
                write!(f, "cleanup interval must be greater than 0")
            }
            RegistryError::ZeroIdleTimeout => write!(f, "idle timeout must be greater than 0"),
            RegistryError::NoRuntime => {
                write!(f, "a Tokio runtime is required to run the cleanup task")
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Policy(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PolicyError> for RegistryError {
    fn from(e: PolicyError) -> Self {
        RegistryError::Policy(e)
    }
}

/// Configuration for an [`IdentityRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Tokens refilled per second for every identity
    pub rate: f64,
    /// Bucket size, the number of requests admitted in a burst
    pub burst: f64,
    /// Time between two cleanup passes
    pub cleanup_interval: Duration,
    /// Idle time after which an identity is forgotten
    pub idle_timeout: Duration,
    clock: Option<Arc<dyn Clock>>,
    tracer: Option<Arc<dyn Tracer>>,
}

impl RegistryConfig {
    /// Configuration admitting `burst` requests at once and `rate` per second after that.
    ///
    /// Cleanup runs every 30 seconds and forgets identities idle for 3 minutes.
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            clock: None,
            tracer: None,
        }
    }

    /// Set the time between cleanup passes.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the idle time after which an identity is forgotten.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the clock used for refills and idle tracking.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set where panics inside cleanup passes are reported.
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    fn validate(&self) -> Result<TokenBucketPolicy, RegistryError> {
        if self.cleanup_interval.is_zero() {
            return Err(RegistryError::ZeroCleanupInterval);
        }
        if self.idle_timeout.is_zero() {
            return Err(RegistryError::ZeroIdleTimeout);
        }
        Ok(TokenBucketPolicy::new(self.burst, self.rate)?)
    }
}

/// Shared handle to one token bucket.
///
/// Clones refer to the same bucket.
#[derive(Debug, Clone)]
pub struct LimiterHandle {
    bucket: Arc<Mutex<TokenBucketPolicy>>,
    clock: Arc<dyn Clock>,
}

impl LimiterHandle {
    fn from_policy(policy: TokenBucketPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            bucket: Arc::new(Mutex::new(policy)),
            clock,
        }
    }

    /// A limiter not tied to any registry, shared by everyone holding a clone.
    ///
    /// # Errors
    /// Returns `PolicyError` if `burst` is not positive or `rate` is negative.
    pub fn standalone(rate: f64, burst: f64) -> Result<Self, PolicyError> {
        Self::standalone_with_clock(rate, burst, Arc::new(SystemClock::new()))
    }

    /// Like [`standalone`](Self::standalone) with an explicit clock.
    pub fn standalone_with_clock(
        rate: f64,
        burst: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PolicyError> {
        Ok(Self::from_policy(TokenBucketPolicy::new(burst, rate)?, clock))
    }

    /// Take one token if available.
    ///
    /// # Returns
    /// True if the request is admitted.
    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        self.bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register_event(now)
            .is_allow()
    }

    /// Tokens left as of the last admission check.
    pub fn available_tokens(&self) -> f64 {
        self.bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .available_tokens()
    }
}

#[derive(Debug)]
struct ClientEntry {
    limiter: LimiterHandle,
    last_seen: Instant,
}

#[derive(Debug)]
struct RegistryShared {
    clients: Mutex<HashMap<String, ClientEntry, RandomState>>,
    prototype: TokenBucketPolicy,
    idle_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RegistryShared {
    fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let before = clients.len();
        clients.retain(|_, entry| {
            now.saturating_duration_since(entry.last_seen) <= self.idle_timeout
        });
        let removed = before - clients.len();

        if removed > 0 {
            debug!(removed, remaining = clients.len(), "evicted idle limiters");
        }
        removed
    }
}

/// Registry of per-identity token buckets.
///
/// Cloning is cheap and every clone shares the same limiters. The cleanup
/// task stops when the last clone is dropped or on [`shutdown`](Self::shutdown).
///
/// # Example
///
/// ```rust,no_run
/// use ephemera::{IdentityRegistry, RegistryConfig};
///
/// # async fn example() {
/// // 1 request per second, bursts of 5, per client IP
/// let limiter = IdentityRegistry::new(RegistryConfig::new(1.0, 5.0)).unwrap();
///
/// if !limiter.get("203.0.113.7").allow() {
///     // respond with 429 Too Many Requests
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    shared: Arc<RegistryShared>,
    cleanup: Arc<Mutex<Option<TaskHandle>>>,
}

impl IdentityRegistry {
    /// Create a registry and start its periodic cleanup.
    ///
    /// # Errors
    /// Returns `RegistryError` if the configuration is invalid or no Tokio
    /// runtime is running.
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let prototype = config.validate()?;
        if !runtime_available() {
            return Err(RegistryError::NoRuntime);
        }

        let shared = Arc::new(RegistryShared {
            clients: Mutex::new(HashMap::with_hasher(RandomState::new())),
            prototype,
            idle_timeout: config.idle_timeout,
            clock: config
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new())),
        });
        let tracer = config
            .tracer
            .unwrap_or_else(|| Arc::new(TracingTracer::new()));

        let weak: Weak<RegistryShared> = Arc::downgrade(&shared);
        let handle = TaskHandle::periodic(
            CLEANUP_TASK,
            config.cleanup_interval,
            config.cleanup_interval,
            tracer,
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.cleanup();
                }
            },
        );

        Ok(Self {
            shared,
            cleanup: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Get the limiter for `identity`, creating it on first sight.
    ///
    /// Marks the identity as seen now, even if the request is later denied.
    pub fn get(&self, identity: &str) -> LimiterHandle {
        let now = self.shared.clock.now();
        let mut clients = self
            .shared
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = clients.get_mut(identity) {
            entry.last_seen = now;
            return entry.limiter.clone();
        }

        let limiter = LimiterHandle::from_policy(
            self.shared.prototype.clone(),
            Arc::clone(&self.shared.clock),
        );
        clients.insert(
            identity.to_string(),
            ClientEntry {
                limiter: limiter.clone(),
                last_seen: now,
            },
        );
        limiter
    }

    /// Shorthand for `get(identity).allow()`.
    pub fn allow(&self, identity: &str) -> bool {
        self.get(identity).allow()
    }

    /// Forget identities idle for longer than the idle timeout.
    ///
    /// # Returns
    /// The number of identities removed.
    pub fn cleanup(&self) -> usize {
        self.shared.cleanup()
    }

    /// Check whether `identity` is currently tracked. Does not refresh it.
    pub fn contains(&self, identity: &str) -> bool {
        self.shared
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identity)
    }

    /// Get the number of tracked identities.
    pub fn len(&self) -> usize {
        self.shared
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no identity is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the cleanup task and wait for it to return.
    ///
    /// Limiters keep working; idle identities are no longer evicted
    /// except through [`cleanup`](Self::cleanup). Calling this twice is a no-op.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the cleanup task did not stop cleanly.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let handle = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        }
    }
}
