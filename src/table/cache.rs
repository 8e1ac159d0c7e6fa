//! Record Cache
//!
//! Bounded per-table read cache. Entries remember the offset they were read
//! from, so a hit is only served while the primary index still points
//! there. Offsets are only unique within one index generation; the whole
//! cache is dropped when the generation moves.

use std::collections::{HashMap, VecDeque};

use crate::record::Record;

struct Cached {
    offset: u64,
    record: Record,
}

/// Insertion-ordered cache; the oldest entry is evicted first
pub struct RecordCache {
    capacity: usize,
    entries: HashMap<u64, Cached>,
    /// Ids in insertion order (oldest at the front)
    order: VecDeque<u64>,
    /// Index generation the cached offsets belong to
    generation: u64,
}

impl RecordCache {
    /// A capacity of 0 disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: VecDeque::new(),
            generation: 0,
        }
    }

    /// Adopt the index generation seen by a reader, clearing on change
    pub fn observe_generation(&mut self, generation: u64) {
        if generation != self.generation {
            self.clear();
            self.generation = generation;
        }
    }

    /// Cached record for `id` if it was read from `offset`
    pub fn get(&self, id: u64, offset: u64) -> Option<Record> {
        self.entries
            .get(&id)
            .filter(|cached| cached.offset == offset)
            .map(|cached| cached.record.clone())
    }

    pub fn put(&mut self, id: u64, offset: u64, record: Record) {
        if self.capacity == 0 {
            return;
        }

        if let Some(cached) = self.entries.get_mut(&id) {
            cached.offset = offset;
            cached.record = record;
            return;
        }

        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }

        self.entries.insert(id, Cached { offset, record });
        self.order.push_back(id);
    }

    pub fn remove(&mut self, id: u64) {
        if self.entries.remove(&id).is_some() {
            self.order.retain(|cached| *cached != id);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
