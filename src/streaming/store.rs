//! Region store boundary
//!
//! The manager never reads or writes persistent state itself. It asks a
//! [`RegionStore`] to produce a chunk (from disk or by generating it) and to
//! persist dirty chunks before they are evicted.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::error::{Error, Result};
use crate::streaming::coord::ChunkKey;

/// Source and sink of chunk content.
///
/// Both operations may suspend on I/O. A failure is reported as `Err` and is
/// handled locally by the manager; it is never fatal to the host loop.
pub trait RegionStore: Send + Sync + 'static {
    /// Opaque chunk payload. Only the dirty flag next to it is interpreted.
    type Content: Clone + Send + Sync + 'static;

    /// Read a chunk from storage, or generate it if it was never stored.
    fn generate_or_read(&self, key: ChunkKey) -> impl Future<Output = Result<Self::Content>> + Send;

    /// Persist a chunk.
    fn write(
        &self,
        key: ChunkKey,
        content: &Self::Content,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Procedural generation of a chunk that has never been stored.
pub trait Generator: Send + Sync + 'static {
    type Content;

    fn generate(&self, key: ChunkKey) -> Result<Self::Content>;
}

impl<C, F> Generator for F
where
    F: Fn(ChunkKey) -> Result<C> + Send + Sync + 'static,
{
    type Content = C;

    fn generate(&self, key: ChunkKey) -> Result<C> {
        self(key)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Region store that keeps "persisted" chunks in a map.
///
/// Counts every call and can be told to fail reads or writes for specific
/// keys, which makes it useful for exercising failure paths.
pub struct MemoryStore<G: Generator> {
    generator: G,
    saved: Mutex<HashMap<ChunkKey, G::Content>>,
    failing_reads: Mutex<HashSet<ChunkKey>>,
    failing_writes: Mutex<HashSet<ChunkKey>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl<G> MemoryStore<G>
where
    G: Generator,
    G::Content: Clone + Send + Sync + 'static,
{
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            saved: Mutex::new(HashMap::new()),
            failing_reads: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Make reads of `key` fail (or succeed again).
    pub fn fail_reads(&self, key: ChunkKey, fail: bool) {
        let mut set = lock(&self.failing_reads);
        if fail {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }

    /// Make writes of `key` fail (or succeed again).
    pub fn fail_writes(&self, key: ChunkKey, fail: bool) {
        let mut set = lock(&self.failing_writes);
        if fail {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }

    /// Content last written for `key`
    pub fn saved(&self, key: ChunkKey) -> Option<G::Content> {
        lock(&self.saved).get(&key).cloned()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl<G> RegionStore for MemoryStore<G>
where
    G: Generator,
    G::Content: Clone + Send + Sync + 'static,
{
    type Content = G::Content;

    async fn generate_or_read(&self, key: ChunkKey) -> Result<G::Content> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing_reads).contains(&key) {
            return Err(Error::Generation(format!("scripted read failure at {}", key)));
        }
        if let Some(content) = lock(&self.saved).get(&key) {
            return Ok(content.clone());
        }
        self.generator.generate(key)
    }

    async fn write(&self, key: ChunkKey, content: &G::Content) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing_writes).contains(&key) {
            return Err(Error::Io(std::io::Error::other(format!(
                "scripted write failure at {}",
                key
            ))));
        }
        lock(&self.saved).insert(key, content.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore<impl Generator<Content = String>> {
        MemoryStore::new(|key: ChunkKey| -> Result<String> { Ok(format!("gen{}", key)) })
    }

    #[tokio::test]
    async fn test_generates_when_not_saved() {
        let store = store();
        let key = ChunkKey::new(1, 2);
        assert_eq!(store.generate_or_read(key).await.unwrap(), "gen<1, 2>");
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_reads_back_written() {
        let store = store();
        let key = ChunkKey::new(0, 0);
        store.write(key, &"edited".to_string()).await.unwrap();

        assert_eq!(store.generate_or_read(key).await.unwrap(), "edited");
        assert_eq!(store.saved(key).as_deref(), Some("edited"));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let store = store();
        let key = ChunkKey::new(3, 3);

        store.fail_reads(key, true);
        assert!(matches!(store.generate_or_read(key).await, Err(Error::Generation(_))));
        store.fail_reads(key, false);
        assert!(store.generate_or_read(key).await.is_ok());

        store.fail_writes(key, true);
        assert!(store.write(key, &"x".to_string()).await.is_err());
        assert!(store.saved(key).is_none());
        assert_eq!(store.write_count(), 1);
    }
}
