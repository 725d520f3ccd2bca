//! Fixed-capacity circular sample buffer.
//!
//! Retains the last `capacity` values pushed into it. Once every slot has
//! been written, each new push overwrites the oldest sample.
//!
//! ```text
//!   capacity = 4, after pushing 1..=6
//!
//!   index:    0     1     2     3
//!           ┌─────┬─────┬─────┬─────┐
//!   slots:  │  5  │  6  │  3  │  4  │
//!           └─────┴─────┴─────┴─────┘
//!                       ▲
//!                    cursor (oldest sample, next write)
//!
//!   range() = [3, 4, 5, 6]
//! ```
//!
//! ## Thread Safety
//!
//! `CircularBuffer` has a single writer. Concurrent writers must wrap it in a
//! lock; readers are safe with a snapshot because [`CircularBuffer::range`]
//! returns an owned copy.

/// Error returned when constructing a buffer with invalid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Capacity must be greater than zero
    ZeroCapacity,
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::ZeroCapacity => write!(f, "buffer capacity must be greater than 0"),
        }
    }
}

impl std::error::Error for BufferError {}

/// Ring buffer holding the most recent `capacity` samples.
///
/// # Example
///
/// ```
/// use ephemera::CircularBuffer;
///
/// let mut buffer = CircularBuffer::new(5).unwrap();
/// for i in 0..10 {
///     buffer.push(i);
/// }
///
/// assert_eq!(buffer.range(), vec![5, 6, 7, 8, 9]);
/// assert!(buffer.is_full());
/// ```
#[derive(Debug, Clone)]
pub struct CircularBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    cursor: usize,
    wrapped: bool,
}

impl<T> CircularBuffer<T> {
    /// Create an empty buffer that retains at most `capacity` samples.
    ///
    /// # Errors
    /// Returns `BufferError::ZeroCapacity` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        Ok(Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
            wrapped: false,
        })
    }

    /// Write a sample, overwriting the oldest one once the buffer is full.
    pub fn push(&mut self, value: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(value);
        } else {
            self.slots[self.cursor] = value;
        }

        if self.cursor == self.capacity - 1 {
            self.wrapped = true;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Number of samples currently retained: `min(pushes, capacity)`.
    pub fn size(&self) -> usize {
        if self.wrapped {
            self.capacity
        } else {
            self.cursor
        }
    }

    /// Maximum number of samples retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once every slot has been written at least once.
    pub fn is_full(&self) -> bool {
        self.wrapped
    }

    /// True if nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The most recently pushed sample.
    pub fn latest(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        let idx = (self.cursor + self.capacity - 1) % self.capacity;
        self.slots.get(idx)
    }
}

impl<T: Clone> CircularBuffer<T> {
    /// Copy of the retained samples ordered oldest to newest.
    pub fn range(&self) -> Vec<T> {
        if !self.wrapped {
            return self.slots[..self.cursor].to_vec();
        }

        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&self.slots[self.cursor..]);
        out.extend_from_slice(&self.slots[..self.cursor]);
        out
    }
}
