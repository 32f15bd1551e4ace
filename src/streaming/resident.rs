//! Resident chunk table
//!
//! The authoritative map from [`ChunkKey`] to in-memory chunk content. All
//! reads and mutations of chunk content go through this table so that the
//! last-access timestamp and dirty flag stay consistent with the content.
//!
//! The table never evicts on its own; eviction decisions belong to the
//! manager, which checks pin state before calling [`ResidentTable::remove`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::streaming::coord::ChunkKey;
use crate::streaming::events::{ChunkEvent, EventBus};

/// A chunk held in memory.
#[derive(Debug, Clone)]
pub struct ResidentChunk<C> {
    content: C,
    /// Mutated since last persisted
    dirty: bool,
    last_access: Instant,
    /// Mirrors the sticky pin for fast-path checks
    sticky: bool,
}

impl<C> ResidentChunk<C> {
    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }
}

/// Map of resident chunks
pub struct ResidentTable<C> {
    chunks: HashMap<ChunkKey, ResidentChunk<C>>,
    events: EventBus<C>,
}

impl<C: Clone> ResidentTable<C> {
    /// Create an empty table publishing `Loaded` events on `events`.
    pub fn new(events: EventBus<C>) -> Self {
        Self {
            chunks: HashMap::new(),
            events,
        }
    }

    /// Get chunk content by key
    ///
    /// Counts as an access. Never loads: a missing chunk stays missing.
    pub fn get(&mut self, key: ChunkKey) -> Option<&C> {
        let chunk = self.chunks.get_mut(&key)?;
        chunk.last_access = Instant::now();
        Some(&chunk.content)
    }

    /// Look at a resident chunk without refreshing its access time.
    pub fn peek(&self, key: ChunkKey) -> Option<&ResidentChunk<C>> {
        self.chunks.get(&key)
    }

    /// Insert or replace a chunk after a successful load.
    ///
    /// The new entry starts clean with last access set to now, and a
    /// `Loaded` event carrying the content is published.
    pub fn record_load(&mut self, key: ChunkKey, content: C, sticky: bool) {
        self.events.emit(ChunkEvent::Loaded {
            key,
            content: content.clone(),
        });
        self.chunks.insert(
            key,
            ResidentChunk {
                content,
                dirty: false,
                last_access: Instant::now(),
                sticky,
            },
        );
    }

    /// Refresh last access without touching content.
    ///
    /// Returns false if the chunk is not resident.
    pub fn record_access(&mut self, key: ChunkKey) -> bool {
        match self.chunks.get_mut(&key) {
            Some(chunk) => {
                chunk.last_access = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove a chunk unconditionally, returning its content.
    ///
    /// Callers must check pin state first.
    pub fn remove(&mut self, key: ChunkKey) -> Option<C> {
        self.chunks.remove(&key).map(|chunk| chunk.content)
    }

    /// Run `f` against the chunk content, marking it dirty.
    ///
    /// Returns `None` if the chunk is not resident.
    pub fn modify<R>(&mut self, key: ChunkKey, f: impl FnOnce(&mut C) -> R) -> Option<R> {
        let chunk = self.chunks.get_mut(&key)?;
        chunk.dirty = true;
        chunk.last_access = Instant::now();
        Some(f(&mut chunk.content))
    }

    pub fn mark_dirty(&mut self, key: ChunkKey) -> bool {
        match self.chunks.get_mut(&key) {
            Some(chunk) => {
                chunk.dirty = true;
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear_dirty(&mut self, key: ChunkKey) {
        if let Some(chunk) = self.chunks.get_mut(&key) {
            chunk.dirty = false;
        }
    }

    pub(crate) fn set_sticky(&mut self, key: ChunkKey, sticky: bool) {
        if let Some(chunk) = self.chunks.get_mut(&key) {
            chunk.sticky = sticky;
        }
    }

    pub fn is_dirty(&self, key: ChunkKey) -> bool {
        self.chunks.get(&key).is_some_and(|c| c.dirty)
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.chunks.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterate over all resident keys
    pub fn keys(&self) -> impl Iterator<Item = &ChunkKey> {
        self.chunks.keys()
    }

    /// Keys of chunks with unpersisted changes
    pub fn dirty_keys(&self) -> Vec<ChunkKey> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Keys whose last access is strictly older than `threshold` at `now`.
    pub fn stale_keys(&self, now: Instant, threshold: Duration) -> Vec<ChunkKey> {
        self.chunks
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_access) > threshold)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChunkEvent<C>> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventBus<C> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResidentTable<String> {
        ResidentTable::new(EventBus::new(16))
    }

    #[test]
    fn test_table_new() {
        let table = table();
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_record_load_and_get() {
        let mut table = table();
        let key = ChunkKey::new(1, 2);

        table.record_load(key, "hills".to_string(), false);
        assert!(table.contains(key));
        assert_eq!(table.get(key), Some(&"hills".to_string()));
        assert!(!table.is_dirty(key));
    }

    #[test]
    fn test_get_does_not_load() {
        let mut table = table();
        assert!(table.get(ChunkKey::new(0, 0)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_record_load_emits_event() {
        let mut table = table();
        let mut rx = table.subscribe();
        let key = ChunkKey::new(3, 3);

        table.record_load(key, "plain".to_string(), true);

        assert_eq!(
            rx.try_recv().unwrap(),
            ChunkEvent::Loaded { key, content: "plain".to_string() }
        );
        assert!(table.peek(key).unwrap().is_sticky());
    }

    #[test]
    fn test_record_load_replaces() {
        let mut table = table();
        let key = ChunkKey::new(1, 1);

        table.record_load(key, "a".to_string(), false);
        table.mark_dirty(key);
        table.record_load(key, "b".to_string(), false);

        assert_eq!(table.len(), 1);
        assert_eq!(table.peek(key).unwrap().content(), "b");
        assert!(!table.is_dirty(key));
    }

    #[test]
    fn test_modify_marks_dirty() {
        let mut table = table();
        let key = ChunkKey::new(0, 1);
        table.record_load(key, "stone".to_string(), false);

        let len = table.modify(key, |c| {
            c.push_str("+ore");
            c.len()
        });
        assert_eq!(len, Some(9));
        assert!(table.is_dirty(key));
        assert_eq!(table.dirty_keys(), vec![key]);

        table.clear_dirty(key);
        assert!(!table.is_dirty(key));

        assert!(table.modify(ChunkKey::new(9, 9), |_| ()).is_none());
    }

    #[test]
    fn test_remove() {
        let mut table = table();
        let key = ChunkKey::new(4, -4);
        table.record_load(key, "sand".to_string(), false);

        assert_eq!(table.remove(key), Some("sand".to_string()));
        assert!(!table.contains(key));
        assert_eq!(table.remove(key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_access_refreshes_staleness() {
        let mut table = table();
        let key = ChunkKey::new(0, 0);
        let threshold = Duration::from_secs(10);
        table.record_load(key, "grass".to_string(), false);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(table.stale_keys(Instant::now(), threshold), vec![key]);

        assert!(table.record_access(key));
        assert!(table.stale_keys(Instant::now(), threshold).is_empty());
        assert!(!table.record_access(ChunkKey::new(5, 5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_keys_boundary() {
        let mut table = table();
        let key = ChunkKey::new(2, 2);
        let threshold = Duration::from_secs(10);
        table.record_load(key, "snow".to_string(), false);

        tokio::time::advance(threshold).await;
        assert!(table.stale_keys(Instant::now(), threshold).is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(table.stale_keys(Instant::now(), threshold), vec![key]);
    }
}
