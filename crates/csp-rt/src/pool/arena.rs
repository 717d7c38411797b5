// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Generational arena of task records.
//!
//! Ready queues carry `TaskId`s, never pointers. A slot's generation is
//! bumped when it is vacated, so a stale id left in a queue after its task
//! finished resolves to nothing instead of to whichever task reused the slot.

use std::fmt;

/// Index of a task record plus the generation of its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}.{}", self.index, self.generation)
    }
}

enum Slot<V> {
    Occupied { generation: u32, value: V },
    Vacant { generation: u32 },
}

pub(crate) struct Arena<V> {
    slots: Vec<Slot<V>>,
    free: Vec<u32>,
    len: usize,
}

impl<V> Arena<V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Id the next `insert` will return.
    pub fn next_id(&self) -> TaskId {
        match self.free.last() {
            Some(&index) => match &self.slots[index as usize] {
                Slot::Vacant { generation } => TaskId {
                    index,
                    generation: *generation,
                },
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            },
            None => TaskId {
                index: self.slots.len() as u32,
                generation: 0,
            },
        }
    }

    pub fn insert(&mut self, value: V) -> TaskId {
        let id = self.next_id();
        let slot = Slot::Occupied {
            generation: id.generation,
            value,
        };
        match self.free.pop() {
            Some(index) => self.slots[index as usize] = slot,
            None => self.slots.push(slot),
        }
        self.len += 1;
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&V> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn remove(&mut self, id: TaskId) -> Option<V> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {}
            _ => return None,
        }
        let next = Slot::Vacant {
            generation: id.generation.wrapping_add(1),
        };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, next) else {
            return None;
        };
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert((arena.next_id(), "a"));
        let b = arena.insert((arena.next_id(), "b"));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&(a, "a")));
        assert_eq!(arena.remove(b).map(|(_, v)| v), Some("b"));
        assert_eq!(arena.get(b), None);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.values().count(), 1);
    }

    #[test]
    fn reused_slot_rejects_stale_id() {
        let mut arena = Arena::new();
        let old = arena.insert(1);
        arena.remove(old);
        let new = arena.insert(2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn display() {
        let mut arena = Arena::new();
        let id = arena.insert(());
        assert_eq!(id.to_string(), "task#0.0");
        assert!(!arena.is_empty());
    }
}
