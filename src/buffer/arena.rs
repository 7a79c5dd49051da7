//! Generational arena for managed buffers
//!
//! Slots are reused through a free list, like page ids in a paged cache. Each
//! reuse bumps the slot generation so that stale handles held by compute
//! operands can be told apart from the slot's new occupant.

use std::fmt;

use super::managed::ManagedBuffer;

/// Stable handle to a buffer in a [`BufferArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId {
    index: u32,
    generation: u32,
}

impl BufferId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    buffer: Option<ManagedBuffer>,
}

/// Arena owning every managed buffer of a pool
#[derive(Debug, Default)]
pub struct BufferArena {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    live: usize,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a buffer and return its handle
    pub fn insert(&mut self, buffer: ManagedBuffer) -> BufferId {
        self.live += 1;
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.buffer = Some(buffer);
            return BufferId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            buffer: Some(buffer),
        });
        BufferId {
            index,
            generation: 0,
        }
    }

    /// Remove a buffer; its handle (and every copy of it) becomes dead
    pub fn remove(&mut self, id: BufferId) -> Option<ManagedBuffer> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let buffer = slot.buffer.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        self.live -= 1;
        Some(buffer)
    }

    /// Resolve a handle; `None` once the buffer was released
    pub fn get(&self, id: BufferId) -> Option<&ManagedBuffer> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.buffer.as_ref())
    }

    pub fn get_mut(&mut self, id: BufferId) -> Option<&mut ManagedBuffer> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.buffer.as_mut())
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live buffers
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate over live buffers with their handles
    pub fn iter(&self) -> impl Iterator<Item = (BufferId, &ManagedBuffer)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.buffer.as_ref().map(|buffer| {
                (
                    BufferId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    buffer,
                )
            })
        })
    }
}
