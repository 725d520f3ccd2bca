//! Integration tests for the circular sample buffer.

use ephemera::{BufferError, CircularBuffer};

#[test]
fn test_keeps_last_capacity_values() {
    let mut buffer = CircularBuffer::new(5).unwrap();
    for i in 0..10 {
        buffer.push(i);
    }

    assert_eq!(buffer.range(), vec![5, 6, 7, 8, 9]);
    assert!(buffer.is_full());
    assert_eq!(buffer.size(), 5);
    assert_eq!(buffer.latest(), Some(&9));
}

#[test]
fn test_wrap_for_every_overflow() {
    const CAPACITY: usize = 4;

    for extra in 0..=CAPACITY * 2 {
        let mut buffer = CircularBuffer::new(CAPACITY).unwrap();
        let pushes = CAPACITY + extra;
        for i in 0..pushes {
            buffer.push(i);
        }

        let expected: Vec<usize> = (pushes - CAPACITY..pushes).collect();
        assert_eq!(buffer.range(), expected, "after {} pushes", pushes);
        assert!(buffer.is_full());
    }
}

#[test]
fn test_partial_fill() {
    let mut buffer = CircularBuffer::new(3).unwrap();
    assert!(buffer.is_empty());
    assert_eq!(buffer.latest(), None);
    assert!(buffer.range().is_empty());

    buffer.push("a");
    buffer.push("b");

    assert_eq!(buffer.range(), vec!["a", "b"]);
    assert!(!buffer.is_full());
    assert_eq!(buffer.size(), 2);
    assert_eq!(buffer.capacity(), 3);
}

#[test]
fn test_range_is_a_copy() {
    let mut buffer = CircularBuffer::new(2).unwrap();
    buffer.push(String::from("x"));

    let mut snapshot = buffer.range();
    snapshot.push(String::from("not in buffer"));

    assert_eq!(buffer.range(), vec![String::from("x")]);
}

#[test]
fn test_zero_capacity_rejected() {
    assert_eq!(
        CircularBuffer::<u8>::new(0).unwrap_err(),
        BufferError::ZeroCapacity
    );
}
