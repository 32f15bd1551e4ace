//! Chunk lifecycle events published to external subscribers

use tokio::sync::broadcast;

use crate::streaming::coord::ChunkKey;

/// Lifecycle notification for a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent<C> {
    /// A chunk became resident. Carries a copy of its content.
    Loaded { key: ChunkKey, content: C },
    /// A chunk was evicted from memory.
    Unloaded { key: ChunkKey },
}

impl<C> ChunkEvent<C> {
    pub fn key(&self) -> ChunkKey {
        match self {
            ChunkEvent::Loaded { key, .. } => *key,
            ChunkEvent::Unloaded { key } => *key,
        }
    }
}

/// Fan-out channel for [`ChunkEvent`]s.
///
/// Publishing never blocks and never fails: with no subscribers the event is
/// simply dropped, and slow subscribers observe `RecvError::Lagged`.
pub struct EventBus<C> {
    tx: broadcast::Sender<ChunkEvent<C>>,
}

impl<C> Clone for EventBus<C> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<C: Clone> EventBus<C> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChunkEvent<C>> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ChunkEvent<C>) {
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }
}
