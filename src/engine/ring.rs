//! Bounded in-memory buffer of the most recently sequenced events.
//!
//! The ring is the hub's fast path: subscribers whose cursor is at or
//! above the ring's lowest sequence number are served without touching
//! the store. Old entries are evicted from the front; a subscriber that
//! falls below the ring refills from the store instead.

use std::collections::VecDeque;

use crate::domain::InvalidationEvent;

pub(crate) struct EventRing {
    events: VecDeque<InvalidationEvent>,
    capacity: usize,
}

impl EventRing {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Lowest sequence number currently held, `None` when empty.
    pub(crate) fn lowest_seq(&self) -> Option<i64> {
        self.events.front().map(InvalidationEvent::sequence)
    }

    /// Highest sequence number currently held, `None` when empty.
    pub(crate) fn head_seq(&self) -> Option<i64> {
        self.events.back().map(InvalidationEvent::sequence)
    }

    /// Replace the ring contents with `events` (ascending by seq).
    /// Used once at sequencer start with the tail of the durable log.
    pub(crate) fn load(&mut self, events: Vec<InvalidationEvent>) {
        self.events = events.into();
        self.evict_overflow();
    }

    /// Append a freshly sequenced batch, evicting the oldest entries
    /// once the capacity is exceeded.
    pub(crate) fn append(&mut self, batch: &[InvalidationEvent]) {
        self.events.extend(batch.iter().cloned());
        self.evict_overflow();
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &InvalidationEvent> {
        self.events.iter()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    fn evict_overflow(&mut self) {
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }
}
