//! Expected trap queue.
//!
//! A fixed-capacity ring of trap identifiers. Test programs append the traps
//! they expect; trap handlers pop the head and compare it with what actually
//! happened.

use crate::Halt;

/// Default number of slots. One slot always stays free, so at most
/// `QUEUE_CAPACITY - 1` expectations can be pending.
pub const QUEUE_CAPACITY: usize = 128;

/// Smallest usable ring: one pending expectation plus the free slot.
pub const MIN_QUEUE_CAPACITY: usize = 2;

/// Value returned by [`ExpectQueue::pop`] when nothing is pending.
pub const QUEUE_EMPTY: u64 = 0;

pub struct ExpectQueue {
    buf: Vec<u64>,
    head: usize,
    tail: usize,
}

impl ExpectQueue {
    /// Ring of `capacity` slots, raised to [`MIN_QUEUE_CAPACITY`] if smaller.
    pub fn new(capacity: usize) -> Self {
        if capacity < MIN_QUEUE_CAPACITY {
            log::warn!("queue capacity {} raised to {}", capacity, MIN_QUEUE_CAPACITY);
        }
        Self {
            buf: vec![0; capacity.max(MIN_QUEUE_CAPACITY)],
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Push `id` at the tail.
    ///
    /// Fails when the push makes the tail catch up with the head.
    pub fn append(&mut self, id: u64) -> Result<(), Halt> {
        self.buf[self.tail] = id;
        self.tail = (self.tail + 1) % self.buf.len();

        if self.tail == self.head {
            log::error!("queue is full");
            return Err(Halt::QueueFull);
        }
        Ok(())
    }

    /// Remove and return the head, or [`QUEUE_EMPTY`] if nothing is pending.
    ///
    /// The sentinel is indistinguishable from an expectation of trap #0.
    pub fn pop(&mut self) -> u64 {
        if self.head == self.tail {
            return QUEUE_EMPTY;
        }
        let id = self.buf[self.head];
        self.head = (self.head + 1) % self.buf.len();
        id
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Number of pending expectations.
    pub fn len(&self) -> usize {
        (self.tail + self.buf.len() - self.head) % self.buf.len()
    }

    /// Pending expectations, head first.
    pub fn pending(&self) -> Vec<u64> {
        (0..self.len())
            .map(|i| self.buf[(self.head + i) % self.buf.len()])
            .collect()
    }
}

impl Default for ExpectQueue {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_append_order() {
        let mut q = ExpectQueue::default();
        q.append(5).unwrap();
        q.append(9).unwrap();
        q.append(2).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.pending(), vec![5, 9, 2]);
        assert_eq!(q.pop(), 5);
        assert_eq!(q.pop(), 9);
        assert_eq!(q.pop(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn empty_pop_returns_sentinel() {
        let mut q = ExpectQueue::default();
        assert_eq!(q.pop(), QUEUE_EMPTY);
        q.append(13).unwrap();
        assert_eq!(q.pop(), 13);
        assert_eq!(q.pop(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn full_queue_is_fatal() {
        let mut q = ExpectQueue::new(4);
        q.append(1).unwrap();
        q.append(2).unwrap();
        q.append(3).unwrap();
        assert!(matches!(q.append(4), Err(Halt::QueueFull)));
    }

    #[test]
    fn default_queue_holds_one_less_than_capacity() {
        let mut q = ExpectQueue::default();
        for id in 0..(QUEUE_CAPACITY as u64 - 1) {
            q.append(id + 32).unwrap();
        }
        assert_eq!(q.len(), QUEUE_CAPACITY - 1);
        assert!(q.append(99).is_err());
    }

    #[test]
    fn wraps_around_the_ring() {
        let mut q = ExpectQueue::new(4);
        for round in 0..10u64 {
            q.append(round).unwrap();
            q.append(round + 100).unwrap();
            assert_eq!(q.pop(), round);
            assert_eq!(q.pop(), round + 100);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn tiny_capacity_is_raised_to_minimum() {
        let mut q = ExpectQueue::new(0);
        assert_eq!(q.capacity(), MIN_QUEUE_CAPACITY);
        q.append(7).unwrap();
        assert!(matches!(q.append(8), Err(Halt::QueueFull)));
    }
}
