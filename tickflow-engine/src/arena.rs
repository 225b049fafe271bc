//! Index arenas for runtime entities.
//!
//! Graphs, outputs and inputs reference each other by typed integer ids
//! rather than by pointer. Freed slots go onto a free list and are reused.

use std::marker::PhantomData;
use tickflow_core::{GraphId, InputId, OutputId};

/// An id type usable as an arena key.
pub trait ArenaId: Copy {
    /// Build the id from a raw slot index.
    fn from_index(index: u32) -> Self;

    /// Raw slot index.
    fn slot(&self) -> usize;
}

macro_rules! impl_arena_id {
    ($($ty:ty),*) => {
        $(
            impl ArenaId for $ty {
                fn from_index(index: u32) -> Self {
                    <$ty>::new(index)
                }

                fn slot(&self) -> usize {
                    self.index()
                }
            }
        )*
    };
}

impl_arena_id!(GraphId, OutputId, InputId);

/// Slot storage with O(1) insert, lookup and removal.
#[derive(Debug)]
pub struct Arena<I, T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    live: usize,
    _id: PhantomData<I>,
}

impl<I: ArenaId, T> Arena<I, T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            _id: PhantomData,
        }
    }

    /// Store a value and return its id.
    pub fn insert(&mut self, value: T) -> I {
        self.insert_with(|_| value)
    }

    /// Store a value built from its own id.
    pub fn insert_with(&mut self, make: impl FnOnce(I) -> T) -> I {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            }
        };
        let id = I::from_index(index);
        self.slots[index as usize] = Some(make(id));
        self.live += 1;
        id
    }

    /// Borrow a value.
    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.slot()).and_then(Option::as_ref)
    }

    /// Mutably borrow a value.
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.slot()).and_then(Option::as_mut)
    }

    /// Remove a value, freeing its slot.
    pub fn remove(&mut self, id: I) -> Option<T> {
        let value = self.slots.get_mut(id.slot()).and_then(Option::take);
        if value.is_some() {
            self.free.push(id.slot() as u32);
            self.live -= 1;
        }
        value
    }

    /// Whether the id refers to a live value.
    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the arena holds no live values.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate live `(id, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (I::from_index(i as u32), v)))
    }
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut arena: Arena<OutputId, &str> = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.len(), 2);

        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.remove(a), None);
        assert!(!arena.contains(a));
        assert!(arena.contains(b));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut arena: Arena<GraphId, u32> = Arena::new();
        let a = arena.insert(1);
        arena.insert(2);
        arena.remove(a);
        let c = arena.insert(3);
        assert_eq!(c, a);
        assert_eq!(arena.get(c), Some(&3));
    }

    #[test]
    fn insert_with_sees_own_id() {
        let mut arena: Arena<InputId, InputId> = Arena::new();
        arena.insert(InputId::new(99));
        let id = arena.insert_with(|id| id);
        assert_eq!(arena.get(id), Some(&id));
        let ids: Vec<_> = arena.iter().map(|(id, _)| id.as_u32()).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
