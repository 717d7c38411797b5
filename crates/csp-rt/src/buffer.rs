// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Bounded slot storage and overflow policies.
//!
//! The buffer never grows past its capacity through `offer`. Whether a full
//! buffer blocks the sender or discards an item is the policy's call.

use std::collections::VecDeque;
use std::fmt;

/// What a full channel does with an incoming item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverflowPolicy {
    /// The sender waits until a slot frees up.
    #[default]
    Block,
    /// The incoming item is discarded; the send still succeeds.
    DropNewest,
    /// The oldest buffered item is evicted to make room.
    DropOldest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Block => write!(f, "block"),
            OverflowPolicy::DropNewest => write!(f, "drop-newest"),
            OverflowPolicy::DropOldest => write!(f, "drop-oldest"),
        }
    }
}

/// Result of offering an item to the buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Offer<T> {
    Stored,
    /// DropNewest on a full buffer: the offered item comes back.
    DroppedNewest(T),
    /// DropOldest on a full buffer: the evicted head comes back.
    EvictedOldest(T),
    /// Block on a full buffer: the offered item comes back untouched.
    Full(T),
}

/// FIFO slot store with a fixed capacity and an overflow policy.
#[derive(Debug)]
pub struct Buffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> Buffer<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_room(&self) -> bool {
        self.items.len() < self.capacity
    }

    /// Whether an offer would complete without waiting.
    pub fn accepts_without_waiting(&self) -> bool {
        self.has_room() || self.policy != OverflowPolicy::Block
    }

    /// Offer an item, applying the overflow policy when full.
    ///
    /// A zero-capacity buffer stores nothing: `Block` reports `Full`, and
    /// both drop policies discard the offered item since there is no head
    /// to evict.
    pub fn offer(&mut self, item: T) -> Offer<T> {
        if self.has_room() {
            self.items.push_back(item);
            return Offer::Stored;
        }
        match self.policy {
            OverflowPolicy::Block => Offer::Full(item),
            OverflowPolicy::DropNewest => Offer::DroppedNewest(item),
            OverflowPolicy::DropOldest => match self.items.pop_front() {
                Some(oldest) => {
                    self.items.push_back(item);
                    Offer::EvictedOldest(oldest)
                }
                None => Offer::DroppedNewest(item),
            },
        }
    }

    /// Append a value taken from a parked sender. Callers only do this
    /// right after a `pop`, so there is always room.
    pub(crate) fn push_back(&mut self, item: T) {
        debug_assert!(self.has_room());
        self.items.push_back(item);
    }

    /// Return an item to the head of the queue.
    ///
    /// Used when a receive that already claimed an item is abandoned; the
    /// item goes back so it is not lost, even if that briefly exceeds the
    /// capacity by one.
    pub(crate) fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_reports_full() {
        let mut buf = Buffer::new(2, OverflowPolicy::Block);
        assert_eq!(buf.offer(1), Offer::Stored);
        assert_eq!(buf.offer(2), Offer::Stored);
        assert_eq!(buf.offer(3), Offer::Full(3));
        assert_eq!(buf.len(), 2);
        assert!(!buf.accepts_without_waiting());
    }

    #[test]
    fn drop_newest_keeps_buffered_items() {
        let mut buf = Buffer::new(1, OverflowPolicy::DropNewest);
        assert_eq!(buf.offer("x"), Offer::Stored);
        assert_eq!(buf.offer("y"), Offer::DroppedNewest("y"));
        assert_eq!(buf.pop(), Some("x"));
        assert_eq!(buf.pop(), None);
    }

    #[test]
    fn drop_oldest_evicts_head_only() {
        let mut buf = Buffer::new(2, OverflowPolicy::DropOldest);
        buf.offer(1);
        buf.offer(2);
        assert_eq!(buf.offer(3), Offer::EvictedOldest(1));
        assert_eq!(buf.pop(), Some(2));
        assert_eq!(buf.pop(), Some(3));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut block = Buffer::new(0, OverflowPolicy::Block);
        assert_eq!(block.offer(1), Offer::Full(1));

        let mut oldest = Buffer::new(0, OverflowPolicy::DropOldest);
        assert_eq!(oldest.offer(1), Offer::DroppedNewest(1));
        assert!(oldest.is_empty());
        assert!(oldest.accepts_without_waiting());
    }

    #[test]
    fn push_front_restores_order() {
        let mut buf = Buffer::new(2, OverflowPolicy::Block);
        buf.offer(2);
        buf.push_front(1);
        assert_eq!(buf.pop(), Some(1));
        assert_eq!(buf.pop(), Some(2));
    }

    #[test]
    fn policy_display() {
        assert_eq!(OverflowPolicy::DropOldest.to_string(), "drop-oldest");
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::Block);
    }
}
