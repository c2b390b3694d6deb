//! Fixed-capacity, non-blocking FIFO queue.
//!
//! [`BoundedQueue`] is the backpressure primitive used everywhere a producer
//! and a consumer run at different speeds: the connection manager's outbound
//! queue and each route's optional delivery buffer.
//!
//! # Why not just a `Vec`? (for beginners)
//!
//! An unbounded queue hides overload: a stuck consumer makes it grow until
//! the process runs out of memory.  A bounded queue turns overload into an
//! explicit, local failure that the producer can see and handle:
//!
//! - `push` on a full queue **fails** and hands the item back.  It never
//!   blocks and never overwrites the oldest entry.
//! - `pop` on an empty queue returns `None`.
//!
//! Retrying is the caller's decision; the queue itself never retries.
//!
//! The storage is a `VecDeque` allocated once at construction, which is a
//! ring buffer: pushes and pops are O(1) and never reallocate.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::warn;

/// Returned by [`BoundedQueue::push`] when the queue is full.
///
/// Carries the rejected item so the caller can retry or drop it explicitly.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue `{label}` is full (capacity {capacity})")]
pub struct QueueFull<T> {
    pub label: String,
    pub capacity: usize,
    pub item: T,
}

impl<T> QueueFull<T> {
    /// Returns the rejected item.
    pub fn into_item(self) -> T {
        self.item
    }
}

/// A fixed-capacity FIFO queue that fails instead of blocking.
///
/// # Examples
///
/// ```rust
/// use iotmsg_core::BoundedQueue;
///
/// let mut q = BoundedQueue::new("demo", 2);
/// assert!(q.push(1).is_ok());
/// assert!(q.push(2).is_ok());
/// let full = q.push(3).unwrap_err();
/// assert_eq!(full.into_item(), 3);
/// assert_eq!(q.pop(), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    label: String,
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue that holds at most `capacity` items.
    ///
    /// `label` identifies the queue in log output.
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            label: label.into(),
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends `item` at the back.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] (holding `item`) when the queue is at capacity.
    /// The queued entries are left untouched.
    pub fn push(&mut self, item: T) -> Result<(), QueueFull<T>> {
        if self.items.len() >= self.capacity {
            warn!(
                "queue `{}` full ({} items), push rejected",
                self.label, self.capacity
            );
            return Err(QueueFull {
                label: self.label.clone(),
                capacity: self.capacity,
                item,
            });
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Removes and returns the front item, or `None` if the queue is empty.
    pub fn pop(&mut self) -> Option<T> {
        let item = self.items.pop_front();
        if item.is_none() {
            warn!("queue `{}` empty, pop returned nothing", self.label);
        }
        item
    }

    /// Returns the front item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Discards every queued item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterates over the queued items from front to back.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_capacity_plus_one_fails_on_last_push() {
        // Arrange
        let capacity = 4;
        let mut q = BoundedQueue::new("test", capacity);

        // Act
        let results: Vec<bool> = (0..=capacity).map(|i| q.push(i).is_ok()).collect();

        // Assert
        assert_eq!(results, vec![true, true, true, true, false]);
        let kept: Vec<usize> = q.iter().copied().collect();
        assert_eq!(kept, vec![0, 1, 2, 3], "first N entries must be unchanged");
    }

    #[test]
    fn test_full_error_returns_rejected_item() {
        let mut q = BoundedQueue::new("out", 1);
        q.push("first".to_string()).unwrap();
        let err = q.push("second".to_string()).unwrap_err();
        assert_eq!(err.capacity, 1);
        assert_eq!(err.label, "out");
        assert_eq!(err.into_item(), "second");
    }

    #[test]
    fn test_pop_is_fifo() {
        let mut q = BoundedQueue::new("fifo", 3);
        for i in 1..=3 {
            q.push(i).unwrap();
        }
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn test_pop_empty_returns_none() {
        let mut q: BoundedQueue<u8> = BoundedQueue::new("empty", 2);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_wraps_around_after_interleaved_push_and_pop() {
        // Arrange: fill, drain partly, refill past the physical end
        let mut q = BoundedQueue::new("ring", 3);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));

        // Act
        q.push(4).unwrap();
        q.push(5).unwrap();

        // Assert
        assert!(q.is_full());
        assert!(q.push(6).is_err());
        let drained: Vec<i32> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(drained, vec![3, 4, 5]);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let mut q = BoundedQueue::new("none", 0);
        assert!(q.push(()).is_err());
        assert!(q.is_empty());
        assert!(q.is_full());
    }

    #[test]
    fn test_peek_and_clear() {
        let mut q = BoundedQueue::new("peek", 2);
        q.push('a').unwrap();
        q.push('b').unwrap();
        assert_eq!(q.peek(), Some(&'a'));
        assert_eq!(q.len(), 2);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 2);
    }
}
