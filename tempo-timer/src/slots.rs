//! Indexed slot arena backing the timing wheel.
//!
//! Slots for every level live in one flat vector (`level * wheel_size + slot`).
//! A side map records where each id currently sits so cancellation can splice
//! an entry out without scanning. Every mutation of slot contents goes through
//! this type; the map and the slots are updated in the same step.

use std::collections::HashMap;
use std::mem;

use crate::wheel::{TimerEntry, TimerId};

/// Where an entry currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    pub(crate) level: usize,
    pub(crate) slot: usize,
    pub(crate) index: usize,
}

#[derive(Debug)]
pub(crate) struct SlotArena {
    wheel_size: usize,
    slots: Vec<Vec<TimerEntry>>,
    index: HashMap<TimerId, Location>,
}

impl SlotArena {
    pub(crate) fn new(levels: usize, wheel_size: usize) -> Self {
        let mut slots = Vec::with_capacity(levels * wheel_size);
        slots.resize_with(levels * wheel_size, Vec::new);
        Self {
            wheel_size,
            slots,
            index: HashMap::new(),
        }
    }

    const fn flat(&self, level: usize, slot: usize) -> usize {
        level * self.wheel_size + slot
    }

    /// Inserts an entry. An entry already stored under the same id is removed
    /// first and returned.
    pub(crate) fn insert(
        &mut self,
        level: usize,
        slot: usize,
        entry: TimerEntry,
    ) -> Option<TimerEntry> {
        let displaced = self.remove(entry.id.as_str());
        let flat = self.flat(level, slot);
        let bucket = &mut self.slots[flat];
        let location = Location {
            level,
            slot,
            index: bucket.len(),
        };
        self.index.insert(entry.id.clone(), location);
        bucket.push(entry);
        displaced
    }

    /// Removes an entry by id, swapping the slot's last entry into its place.
    pub(crate) fn remove(&mut self, id: &str) -> Option<TimerEntry> {
        let location = self.index.remove(id)?;
        let flat = self.flat(location.level, location.slot);
        let bucket = &mut self.slots[flat];
        let entry = bucket.swap_remove(location.index);
        if let Some(moved) = bucket.get(location.index) {
            if let Some(moved_location) = self.index.get_mut(moved.id.as_str()) {
                moved_location.index = location.index;
            }
        }
        Some(entry)
    }

    /// Takes every entry out of a slot.
    pub(crate) fn drain_slot(&mut self, level: usize, slot: usize) -> Vec<TimerEntry> {
        let flat = self.flat(level, slot);
        let entries = mem::take(&mut self.slots[flat]);
        for entry in &entries {
            self.index.remove(entry.id.as_str());
        }
        entries
    }

    pub(crate) fn get(&self, id: &str) -> Option<&TimerEntry> {
        let location = self.index.get(id)?;
        self.slots[self.flat(location.level, location.slot)].get(location.index)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub(crate) fn location(&self, id: &str) -> Option<Location> {
        self.index.get(id).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn clear(&mut self) {
        for bucket in &mut self.slots {
            bucket.clear();
        }
        self.index.clear();
    }

    /// Checks that the index and the slot contents describe the same entries.
    pub(crate) fn is_consistent(&self) -> bool {
        let mut stored = 0;
        for (flat, bucket) in self.slots.iter().enumerate() {
            for (index, entry) in bucket.iter().enumerate() {
                stored += 1;
                let expected = Location {
                    level: flat / self.wheel_size,
                    slot: flat % self.wheel_size,
                    index,
                };
                if self.index.get(entry.id.as_str()) != Some(&expected) {
                    return false;
                }
            }
        }
        stored == self.index.len()
    }
}
