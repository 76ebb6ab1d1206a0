//! Generational arena for engine records.
//!
//! Tokens, regions and logical clocks are stored here and referred to by
//! [`ArenaIndex`]. A removed slot bumps its generation, so an index held by a
//! queue or a late call completion after the record is gone simply misses.

use core::fmt;

use serde::Serialize;

/// Slot position plus the generation it was issued under.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Builds an index directly. Only meaningful for tests and display.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Raw slot position.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation counter of the slot at issue time.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Vec-backed arena with a LIFO free list.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live values.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when no value is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value` and returns its index.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.insert_with(|_| value)
    }

    /// Stores the value built by `f`, which receives the index it will live at.
    ///
    /// Records that carry their own id use this to avoid a second pass.
    pub fn insert_with(&mut self, f: impl FnOnce(ArenaIndex) -> T) -> ArenaIndex {
        self.len += 1;
        if let Some(position) = self.free.pop() {
            let slot = &mut self.slots[position as usize];
            let idx = ArenaIndex::new(position, slot.generation);
            slot.value = Some(f(idx));
            return idx;
        }
        let position = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("arena exhausted: more than {} live slots", u32::MAX);
        });
        let idx = ArenaIndex::new(position, 0);
        self.slots.push(Slot {
            generation: 0,
            value: Some(f(idx)),
        });
        idx
    }

    /// Removes and returns the value at `idx`, if it is still live.
    pub fn remove(&mut self, idx: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(idx.index as usize)?;
        if slot.generation != idx.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx.index);
        self.len -= 1;
        Some(value)
    }

    /// Shared access to a live value.
    #[must_use]
    pub fn get(&self, idx: ArenaIndex) -> Option<&T> {
        self.slots
            .get(idx.index as usize)
            .filter(|slot| slot.generation == idx.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Exclusive access to a live value.
    pub fn get_mut(&mut self, idx: ArenaIndex) -> Option<&mut T> {
        self.slots
            .get_mut(idx.index as usize)
            .filter(|slot| slot.generation == idx.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// True when `idx` still refers to a live value.
    #[must_use]
    pub fn contains(&self, idx: ArenaIndex) -> bool {
        self.get(idx).is_some()
    }

    /// Live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(position, slot)| {
            slot.value.as_ref().map(|value| {
                // Slot count is bounded by u32 in insert_with.
                #[allow(clippy::cast_possible_truncation)]
                let idx = ArenaIndex::new(position as u32, slot.generation);
                (idx, value)
            })
        })
    }
}
