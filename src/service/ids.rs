use std::collections::HashSet;

use crate::models::event::{Event, EventId};

/// Largest id a reply may ask for. Anything above is reminted, which keeps
/// room for minting above it.
pub const MAX_REQUESTED_ID: EventId = i64::MAX as EventId;

/// Hands out event ids for one session.
///
/// An id that has been seen once (even if the event was later deleted) is
/// never handed out again. Requested ids are honoured when unused; anything
/// else gets a fresh id above every id seen so far.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    seen: HashSet<EventId>,
    max: EventId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(events: &[Event]) -> Self {
        let mut ids = Self::new();
        for event in events {
            ids.observe(event.id);
        }
        ids
    }

    pub fn observe(&mut self, id: EventId) {
        self.seen.insert(id);
        self.max = self.max.max(id);
    }

    pub fn is_used(&self, id: EventId) -> bool {
        self.seen.contains(&id)
    }

    pub fn max(&self) -> EventId {
        self.max
    }

    /// Returns an id above every id seen so far. Once `EventId::MAX` has
    /// been seen there is nothing above it, so the lowest free id is used.
    pub fn mint(&mut self) -> EventId {
        let id = match self.max.checked_add(1) {
            Some(id) => id,
            None => self.lowest_free(),
        };
        self.observe(id);
        id
    }

    fn lowest_free(&self) -> EventId {
        let mut id = 1;
        while self.seen.contains(&id) {
            id += 1;
        }
        id
    }

    /// Keeps `requested` if it has never been used and is at most
    /// [`MAX_REQUESTED_ID`], otherwise mints.
    pub fn claim(&mut self, requested: Option<EventId>) -> EventId {
        match requested {
            Some(id) if id <= MAX_REQUESTED_ID && !self.is_used(id) => {
                self.observe(id);
                id
            }
            _ => self.mint(),
        }
    }
}
