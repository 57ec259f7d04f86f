//! Bounded FIFO buffer for recent samples.
//!
//! Every sample channel, the smoothed-history traces, and the audit log share
//! this primitive: push appends in O(1) and evicts the oldest entry once the
//! configured capacity is reached, so length never exceeds capacity.

use std::collections::VecDeque;

/// Fixed-capacity ring buffer. Insertion-ordered, oldest-first.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, evicting the oldest if the buffer is full.
    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove all items. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Iterate oldest to newest. Double-ended, so callers can walk newest
    /// first with `rev()`.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.buf.iter()
    }

    /// Iterate over the last `n` items, oldest of those first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &T> {
        self.buf.iter().skip(self.buf.len().saturating_sub(n))
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Snapshot of the last `n` items as an owned vec.
    pub fn tail_vec(&self, n: usize) -> Vec<T> {
        self.tail(n).cloned().collect()
    }

    /// Snapshot of the whole buffer, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut buf = RingBuffer::new(3);
        buf.push(1);
        buf.push(2);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut buf = RingBuffer::new(3);
        for i in 0..10 {
            buf.push(i);
            assert!(buf.len() <= buf.capacity());
        }
        assert_eq!(buf.to_vec(), vec![7, 8, 9]);
    }

    #[test]
    fn test_tail_vec() {
        let mut buf = RingBuffer::new(5);
        for i in 0..5 {
            buf.push(i);
        }
        assert_eq!(buf.tail_vec(2), vec![3, 4]);
        // Asking for more than is buffered returns everything
        assert_eq!(buf.tail_vec(100), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_iter_reverses() {
        let mut buf = RingBuffer::new(3);
        for i in 0..5 {
            buf.push(i);
        }
        let newest_first: Vec<i32> = buf.iter().rev().copied().collect();
        assert_eq!(newest_first, vec![4, 3, 2]);
    }

    #[test]
    fn test_clear() {
        let mut buf = RingBuffer::new(4);
        buf.push(1);
        buf.push(2);
        buf.clear();
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 4);
    }
}
