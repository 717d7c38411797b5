// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Ready queues.
//!
//! Per-worker bounded FIFO plus a global injection queue. Both hold task
//! ids only; the record lives in the arena. Workers steal from each other
//! when idle.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::arena::TaskId;

/// Max ids in a single worker's local queue before overflow.
pub(crate) const LOCAL_CAPACITY: usize = 1024;

/// Per-worker local queue.
///
/// Owner pops from the front, stealers take from the back. Both paths go
/// through the same mutex.
pub(crate) struct LocalQueue {
    deque: Mutex<VecDeque<TaskId>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::with_capacity(LOCAL_CAPACITY)),
        }
    }

    /// Push an id. Hands it back if the queue is full.
    pub fn push(&self, id: TaskId) -> Result<(), TaskId> {
        let mut q = self.deque.lock();
        if q.len() >= LOCAL_CAPACITY {
            return Err(id);
        }
        q.push_back(id);
        Ok(())
    }

    pub fn pop(&self) -> Option<TaskId> {
        self.deque.lock().pop_front()
    }

    /// Steal half the queue from the back, at least one if non-empty.
    pub fn steal_batch(&self) -> Vec<TaskId> {
        let mut q = self.deque.lock();
        let count = (q.len() / 2).max(q.len().min(1));
        let at = q.len() - count;
        q.drain(at..).rev().collect()
    }

    pub fn len(&self) -> usize {
        self.deque.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deque.lock().is_empty()
    }
}

/// Global injection queue. Wakes from outside the pool and local
/// overflow land here.
pub(crate) struct InjectorQueue {
    queue: Mutex<VecDeque<TaskId>>,
}

impl InjectorQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, id: TaskId) {
        self.queue.lock().push_back(id);
    }

    pub fn pop(&self) -> Option<TaskId> {
        self.queue.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::arena::Arena;

    fn ids(n: usize) -> Vec<TaskId> {
        let mut arena = Arena::new();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn local_queue_is_fifo() {
        let q = LocalQueue::new();
        let ids = ids(3);
        for id in &ids {
            q.push(*id).unwrap();
        }
        assert_eq!(q.pop(), Some(ids[0]));
        assert_eq!(q.pop(), Some(ids[1]));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn local_queue_overflow() {
        let q = LocalQueue::new();
        let ids = ids(LOCAL_CAPACITY + 1);
        for id in &ids[..LOCAL_CAPACITY] {
            q.push(*id).unwrap();
        }
        assert_eq!(q.push(ids[LOCAL_CAPACITY]), Err(ids[LOCAL_CAPACITY]));
    }

    #[test]
    fn steal_takes_half_from_the_back() {
        let q = LocalQueue::new();
        let ids = ids(10);
        for id in &ids {
            q.push(*id).unwrap();
        }
        let stolen = q.steal_batch();
        assert_eq!(stolen.len(), 5);
        assert_eq!(stolen[0], ids[9]);
        assert_eq!(q.len(), 5);
        assert_eq!(q.pop(), Some(ids[0]));
    }

    #[test]
    fn steal_at_least_one() {
        let q = LocalQueue::new();
        q.push(ids(1)[0]).unwrap();
        assert_eq!(q.steal_batch().len(), 1);
        assert!(q.is_empty());
        assert!(q.steal_batch().is_empty());
    }

    #[test]
    fn injector_push_pop() {
        let q = InjectorQueue::new();
        let ids = ids(2);
        q.push(ids[0]);
        q.push(ids[1]);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(ids[0]));
        assert!(!q.is_empty());
    }
}
