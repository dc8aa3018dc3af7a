//! Entry allocator.
//!
//! Entries live in slots that are recycled through a free list. When the free
//! list runs dry the pool grows by a block of slots, and each block is twice
//! the size of the previous one.

use super::entry::{CacheEntry, EntryId};

struct Slot {
    generation: u32,
    entry: Option<CacheEntry>,
}

pub struct EntryPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    block: usize,
    live: usize,
}

impl EntryPool {
    pub fn new(block: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            block: block.max(1),
            live: 0,
        }
    }

    pub fn insert(&mut self, entry: CacheEntry) -> EntryId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => self.grow(),
        };

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.live += 1;

        EntryId {
            index,
            generation: slot.generation,
        }
    }

    /// Takes the entry out of its slot and invalidates `id`.
    pub fn remove(&mut self, id: EntryId) -> Option<CacheEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(entry)
    }

    pub fn get(&self, id: EntryId) -> Option<&CacheEntry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut CacheEntry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &CacheEntry)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|entry| {
                (
                    EntryId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    entry,
                )
            })
        })
    }

    /// Slots allocated so far, used or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// Adds a block of slots and hands out the first of them.
    fn grow(&mut self) -> u32 {
        let start = self.slots.len();
        let end = start + self.block;
        self.slots.extend((start..end).map(|_| Slot {
            generation: 0,
            entry: None,
        }));
        // Reversed so that low slots are handed out first.
        self.free.extend((start + 1..end).rev().map(|i| i as u32));
        self.block *= 2;
        start as u32
    }
}
