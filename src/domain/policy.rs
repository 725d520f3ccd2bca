//! Rate limiting policies for per-identity admission.
//!
//! This module defines the core trait for admission policies and provides
//! the token bucket implementation used by the identity registry.

use std::time::Instant;

/// Decision made by a rate limiting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Admit the request
    Allow,
    /// Reject the request
    Deny,
}

impl PolicyDecision {
    /// Check if this decision is Allow.
    pub fn is_allow(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }

    /// Check if this decision is Deny.
    pub fn is_deny(&self) -> bool {
        matches!(self, PolicyDecision::Deny)
    }
}

/// Error returned when policy parameters are invalid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolicyError {
    /// Burst capacity must be a finite number greater than zero
    InvalidCapacity(f64),
    /// Refill rate must be a finite, non-negative number
    InvalidRefillRate(f64),
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::InvalidCapacity(c) => {
                write!(f, "burst capacity must be finite and greater than 0, got {}", c)
            }
            PolicyError::InvalidRefillRate(r) => {
                write!(f, "refill rate must be finite and non-negative, got {}", r)
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Trait for implementing admission policies.
///
/// Policies decide whether a request should be admitted based on the
/// history of requests they have already seen.
pub trait RateLimitPolicy: Send + Sync {
    /// Register a request and decide whether to admit it.
    ///
    /// # Arguments
    /// * `timestamp` - When the request arrived
    fn register_event(&mut self, timestamp: Instant) -> PolicyDecision;
}

/// Token bucket policy.
///
/// The bucket holds at most `capacity` tokens and starts full. Tokens are
/// refilled continuously at `refill_rate` tokens per second. Each admitted
/// request consumes one token; a request arriving at an empty bucket is denied.
///
/// # Example
/// ```
/// use ephemera::{RateLimitPolicy, TokenBucketPolicy};
/// use std::time::{Duration, Instant};
///
/// let mut bucket = TokenBucketPolicy::new(2.0, 1.0).unwrap();
/// let now = Instant::now();
///
/// assert!(bucket.register_event(now).is_allow());
/// assert!(bucket.register_event(now).is_allow());
/// assert!(bucket.register_event(now).is_deny());
///
/// // One second later a single token has been refilled
/// let later = now + Duration::from_secs(1);
/// assert!(bucket.register_event(later).is_allow());
/// assert!(bucket.register_event(later).is_deny());
/// ```
#[derive(Debug, Clone)]
pub struct TokenBucketPolicy {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Option<Instant>,
}

impl TokenBucketPolicy {
    /// Create a new token bucket.
    ///
    /// # Arguments
    /// * `capacity` - Burst size, the maximum number of tokens held
    /// * `refill_rate` - Tokens added per second
    ///
    /// # Errors
    /// Returns `PolicyError` if `capacity` is not a finite positive number or
    /// `refill_rate` is negative or not finite.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, PolicyError> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(PolicyError::InvalidCapacity(capacity));
        }
        if !refill_rate.is_finite() || refill_rate < 0.0 {
            return Err(PolicyError::InvalidRefillRate(refill_rate));
        }
        Ok(Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: None,
        })
    }

    /// Burst capacity of the bucket.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Tokens available as of the last registered request.
    pub fn available_tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        if let Some(last) = self.last_refill {
            // A clock that went backwards yields zero elapsed time.
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        }
        self.last_refill = Some(match self.last_refill {
            Some(last) if last > now => last,
            _ => now,
        });
    }
}

impl RateLimitPolicy for TokenBucketPolicy {
    fn register_event(&mut self, timestamp: Instant) -> PolicyDecision {
        self.refill(timestamp);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            PolicyDecision::Allow
        } else {
            PolicyDecision::Deny
        }
    }
}
