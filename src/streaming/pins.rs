//! Pin ledger
//!
//! Tracks why a chunk must stay resident. A chunk is pinned when any of
//! these holds:
//! - it is sticky (administrative force-load, e.g. spawn regions)
//! - at least one ticket references it
//! - at least one viewer can see it
//!
//! Viewer membership is not stored here; it is read from a
//! [`VisibilityIndex`] so that every check sees the union of all viewers.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::streaming::coord::ChunkKey;

/// Opaque identifier of an explicit hold on a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(pub u64);

impl From<u64> for TicketId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Answers whether any viewer currently sees a chunk.
pub trait VisibilityIndex {
    fn is_referenced(&self, key: ChunkKey) -> bool;
}

#[derive(Debug, Default)]
struct PinEntry {
    sticky: bool,
    tickets: HashSet<TicketId>,
}

impl PinEntry {
    fn is_empty(&self) -> bool {
        !self.sticky && self.tickets.is_empty()
    }
}

/// Sticky and ticket pins per chunk
#[derive(Debug, Default)]
pub struct PinLedger {
    entries: HashMap<ChunkKey, PinEntry>,
}

impl PinLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the sticky pin. Returns true if the state changed.
    pub fn set_sticky(&mut self, key: ChunkKey, on: bool) -> bool {
        if on {
            let entry = self.entries.entry(key).or_default();
            let changed = !entry.sticky;
            entry.sticky = true;
            changed
        } else {
            let Some(entry) = self.entries.get_mut(&key) else {
                return false;
            };
            let changed = entry.sticky;
            entry.sticky = false;
            self.prune(key);
            changed
        }
    }

    /// Add a ticket. Returns true if the (key, ticket) pair was new.
    pub fn add_ticket(&mut self, key: ChunkKey, ticket: TicketId) -> bool {
        self.entries.entry(key).or_default().tickets.insert(ticket)
    }

    /// Remove a ticket. Returns true if the pair existed.
    ///
    /// Dropping the last ticket only makes the chunk eligible for eviction.
    pub fn remove_ticket(&mut self, key: ChunkKey, ticket: TicketId) -> bool {
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        let removed = entry.tickets.remove(&ticket);
        self.prune(key);
        removed
    }

    pub fn is_sticky(&self, key: ChunkKey) -> bool {
        self.entries.get(&key).is_some_and(|e| e.sticky)
    }

    pub fn ticket_count(&self, key: ChunkKey) -> usize {
        self.entries.get(&key).map_or(0, |e| e.tickets.len())
    }

    /// Pinned by sticky or tickets alone, ignoring viewers.
    pub fn is_held(&self, key: ChunkKey) -> bool {
        self.entries.get(&key).is_some_and(|e| !e.is_empty())
    }

    /// Whether the chunk may not be evicted.
    pub fn is_pinned(&self, key: ChunkKey, visibility: &impl VisibilityIndex) -> bool {
        self.is_held(key) || visibility.is_referenced(key)
    }

    fn prune(&mut self, key: ChunkKey) {
        if self.entries.get(&key).is_some_and(PinEntry::is_empty) {
            self.entries.remove(&key);
        }
    }
}
