//! De-duplicated two-tier work queue
//!
//! Only two priorities exist, so instead of a heap the queue keeps one FIFO
//! per tier. High-priority entries always drain before normal ones and
//! arrival order is preserved inside each tier.

use std::collections::{HashMap, VecDeque};

use crate::streaming::coord::ChunkKey;

/// Queue priority tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Normal,
    High,
}

impl Priority {
    pub fn from_high(high: bool) -> Self {
        if high { Priority::High } else { Priority::Normal }
    }
}

/// Outcome of [`WorkQueue::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New entry appended to its tier
    Inserted,
    /// Existing normal entry moved to the high tier
    Upgraded,
    /// Already queued at the same or higher priority
    Unchanged,
}

/// Ordered set of chunk keys with a priority per key
#[derive(Debug, Default)]
pub struct WorkQueue {
    high: VecDeque<ChunkKey>,
    normal: VecDeque<ChunkKey>,
    queued: HashMap<ChunkKey, Priority>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a key, upgrading it in place if it is already queued at
    /// normal priority. Priority never goes down.
    pub fn push(&mut self, key: ChunkKey, priority: Priority) -> PushOutcome {
        match self.queued.get(&key).copied() {
            Some(Priority::High) => PushOutcome::Unchanged,
            Some(Priority::Normal) if priority == Priority::Normal => PushOutcome::Unchanged,
            Some(Priority::Normal) => {
                if let Some(pos) = self.normal.iter().position(|k| *k == key) {
                    self.normal.remove(pos);
                }
                self.high.push_back(key);
                self.queued.insert(key, Priority::High);
                PushOutcome::Upgraded
            }
            None => {
                match priority {
                    Priority::High => self.high.push_back(key),
                    Priority::Normal => self.normal.push_back(key),
                }
                self.queued.insert(key, priority);
                PushOutcome::Inserted
            }
        }
    }

    /// Put a popped key back at the front of its tier.
    ///
    /// A key that was queued again in the meantime keeps its place and is
    /// only upgraded.
    pub fn requeue(&mut self, key: ChunkKey, priority: Priority) -> PushOutcome {
        if self.queued.contains_key(&key) {
            return self.push(key, priority);
        }
        match priority {
            Priority::High => self.high.push_front(key),
            Priority::Normal => self.normal.push_front(key),
        }
        self.queued.insert(key, priority);
        PushOutcome::Inserted
    }

    /// Take the next key, high tier first.
    pub fn pop(&mut self) -> Option<(ChunkKey, Priority)> {
        let key = self.high.pop_front().or_else(|| self.normal.pop_front())?;
        let priority = self.queued.remove(&key)?;
        Some((key, priority))
    }

    /// Take up to `max` keys in queue order.
    pub fn pop_many(&mut self, max: usize) -> Vec<ChunkKey> {
        std::iter::from_fn(|| self.pop()).take(max).map(|(k, _)| k).collect()
    }

    /// Drop a key from the queue if present.
    pub fn remove(&mut self, key: ChunkKey) -> bool {
        let Some(priority) = self.queued.remove(&key) else {
            return false;
        };
        let tier = match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
        };
        if let Some(pos) = tier.iter().position(|k| *k == key) {
            tier.remove(pos);
        }
        true
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.queued.contains_key(&key)
    }

    pub fn priority(&self, key: ChunkKey) -> Option<Priority> {
        self.queued.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Keys in drain order
    pub fn iter(&self) -> impl Iterator<Item = &ChunkKey> {
        self.high.iter().chain(self.normal.iter())
    }
}
