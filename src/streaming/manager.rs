//! Chunk streaming manager
//!
//! Reconciles every demand source for chunks against a single resident table:
//! - viewers, through the [`VisibilityTracker`]
//! - sticky regions and tickets, through the [`PinLedger`]
//! - staleness, through the idle sweep
//!
//! Demand is turned into entries on two de-duplicated queues which are
//! drained a bounded number of entries at a time. Only the region store
//! calls suspend; all bookkeeping happens on `&mut self`, so a host that
//! needs sharing wraps the manager in one lock or drives it from
//! [`service`](crate::streaming::service).

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::core::config::StreamingConfig;
use crate::core::error::Result;
use crate::core::logging::LOG_TARGET;
use crate::streaming::coord::ChunkKey;
use crate::streaming::events::{ChunkEvent, EventBus};
use crate::streaming::pins::{PinLedger, TicketId};
use crate::streaming::queue::{Priority, PushOutcome, WorkQueue};
use crate::streaming::resident::{ResidentChunk, ResidentTable};
use crate::streaming::store::RegionStore;
use crate::streaming::visibility::{ViewerId, VisibilityDiff, VisibilityTracker};

/// Running counters for streaming work.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingStats {
    /// Chunks that became resident
    pub chunks_loaded: u64,
    /// Loads dropped because the store failed
    pub load_failures: u64,
    /// Chunks evicted
    pub chunks_unloaded: u64,
    /// Dirty chunks persisted (on unload or flush)
    pub chunks_written: u64,
    /// Writes that failed, keeping the chunk resident
    pub write_failures: u64,
    /// Queued unloads cancelled because the chunk was pinned again
    pub unloads_aborted: u64,
    /// Chunks the idle sweep queued for unload
    pub sweep_candidates: u64,
}

/// Work done by one [`ChunkManager::tick`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub loaded: usize,
    pub unloaded: usize,
}

/// Owner of all chunk residency decisions.
pub struct ChunkManager<S: RegionStore> {
    store: Arc<S>,
    config: StreamingConfig,
    resident: ResidentTable<S::Content>,
    pins: PinLedger,
    visibility: VisibilityTracker,
    load_queue: WorkQueue,
    unload_queue: WorkQueue,
    /// Keys popped from the load queue whose store call has not finished
    in_flight: HashSet<ChunkKey>,
    stats: StreamingStats,
}

impl<S: RegionStore> ChunkManager<S> {
    pub fn new(store: Arc<S>, config: StreamingConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            store,
            config,
            resident: ResidentTable::new(events),
            pins: PinLedger::new(),
            visibility: VisibilityTracker::new(),
            load_queue: WorkQueue::new(),
            unload_queue: WorkQueue::new(),
            in_flight: HashSet::new(),
            stats: StreamingStats::default(),
        }
    }

    /// Receive `Loaded` / `Unloaded` events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChunkEvent<S::Content>> {
        self.resident.subscribe()
    }

    // --- Resident access ---

    /// Content of a resident chunk. Counts as an access; never loads.
    pub fn get(&mut self, key: ChunkKey) -> Option<&S::Content> {
        self.resident.get(key)
    }

    /// Resident entry without refreshing its access time.
    pub fn peek(&self, key: ChunkKey) -> Option<&ResidentChunk<S::Content>> {
        self.resident.peek(key)
    }

    /// Mutate a resident chunk and mark it dirty.
    pub fn modify<R>(&mut self, key: ChunkKey, f: impl FnOnce(&mut S::Content) -> R) -> Option<R> {
        self.resident.modify(key, f)
    }

    /// Flag a resident chunk as needing persistence.
    pub fn mark_dirty(&mut self, key: ChunkKey) -> bool {
        self.resident.mark_dirty(key)
    }

    pub fn is_resident(&self, key: ChunkKey) -> bool {
        self.resident.contains(key)
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn resident_keys(&self) -> impl Iterator<Item = &ChunkKey> {
        self.resident.keys()
    }

    // --- Pins ---

    /// Force a chunk to stay resident (or release it).
    ///
    /// Turning the pin on for a chunk that is not resident schedules a
    /// high-priority load. Turning it off never unloads by itself.
    pub fn set_sticky(&mut self, key: ChunkKey, on: bool) {
        if self.pins.set_sticky(key, on) {
            log::debug!(target: LOG_TARGET, "sticky {} -> {}", key, on);
        }
        self.resident.set_sticky(key, on);
        if on {
            self.enqueue_load(key, true);
        }
    }

    /// Hold a chunk on behalf of `ticket`, loading it if needed.
    ///
    /// Only a chunk that nothing pinned before gets a high-priority load;
    /// otherwise a missing chunk is queued at normal priority, and an
    /// existing entry keeps its place.
    pub fn add_ticket(&mut self, key: ChunkKey, ticket: TicketId) {
        let was_pinned = self.is_pinned(key);
        let added = self.pins.add_ticket(key, ticket);
        if added {
            log::debug!(target: LOG_TARGET, "ticket {:?} added to {}", ticket, key);
        }
        self.enqueue_load(key, added && !was_pinned);
    }

    /// Release a hold. The chunk becomes eligible for eviction once
    /// nothing else pins it; the idle sweep or a viewer diff unloads it.
    pub fn remove_ticket(&mut self, key: ChunkKey, ticket: TicketId) {
        if self.pins.remove_ticket(key, ticket) {
            log::debug!(
                target: LOG_TARGET,
                "ticket {:?} removed from {}, {} left",
                ticket,
                key,
                self.pins.ticket_count(key)
            );
        }
    }

    /// Whether the chunk is sticky, ticketed or seen by any viewer.
    pub fn is_pinned(&self, key: ChunkKey) -> bool {
        self.pins.is_pinned(key, &self.visibility)
    }

    pub fn pins(&self) -> &PinLedger {
        &self.pins
    }

    // --- Viewers ---

    /// Move a viewer and schedule the resulting loads and unloads.
    ///
    /// Every visible resident chunk has its access time refreshed, even when
    /// the viewer did not move. Visible chunks that are not resident are
    /// (re)queued for load, high priority when within the near threshold.
    /// Chunks the viewer stopped seeing are queued for unload only if no
    /// other pin holds them.
    pub fn update_viewer(
        &mut self,
        viewer: ViewerId,
        center: ChunkKey,
        radius: u32,
    ) -> VisibilityDiff {
        let diff = self.visibility.update_viewer(viewer, center, radius);

        let visible: Vec<ChunkKey> = match self.visibility.visible(viewer) {
            Some(set) => set.iter().copied().collect(),
            None => Vec::new(),
        };

        // Entered keys first so they keep their nearest-first order
        let entered: HashSet<ChunkKey> = diff.entered.iter().copied().collect();
        let refresh = diff
            .entered
            .iter()
            .copied()
            .chain(visible.into_iter().filter(|k| !entered.contains(k)));

        for key in refresh {
            if !self.resident.record_access(key) {
                let high = center.distance(key) <= self.config.near_threshold;
                self.enqueue_load(key, high);
            }
        }

        for key in &diff.left {
            self.enqueue_unload(*key);
        }

        if !diff.is_empty() {
            log::debug!(
                target: LOG_TARGET,
                "viewer {:?} at {} r={}: {} entered, {} left",
                viewer, center, radius, diff.entered.len(), diff.left.len()
            );
        }

        diff
    }

    /// Drop a viewer, treating everything it saw as left.
    pub fn remove_viewer(&mut self, viewer: ViewerId) -> Vec<ChunkKey> {
        let left = self.visibility.remove_viewer(viewer);
        for key in &left {
            self.enqueue_unload(*key);
        }
        log::debug!(
            target: LOG_TARGET,
            "viewer {:?} removed, {} chunks released",
            viewer,
            left.len()
        );
        left
    }

    pub fn visibility(&self) -> &VisibilityTracker {
        &self.visibility
    }

    // --- Scheduling ---

    /// Queue a load. Skipped when the chunk is resident or already loading;
    /// an existing normal-priority entry is upgraded by a high request.
    pub fn enqueue_load(&mut self, key: ChunkKey, high: bool) -> bool {
        if self.resident.contains(key) || self.in_flight.contains(&key) {
            return false;
        }
        self.load_queue.push(key, Priority::from_high(high)) != PushOutcome::Unchanged
    }

    /// Queue an unload. Skipped when the chunk is not resident, is pinned,
    /// or is already queued.
    pub fn enqueue_unload(&mut self, key: ChunkKey) -> bool {
        if !self.resident.contains(key) || self.is_pinned(key) || self.unload_queue.contains(key) {
            return false;
        }
        self.unload_queue.push(key, Priority::Normal);
        true
    }

    pub fn is_loading(&self, key: ChunkKey) -> bool {
        self.in_flight.contains(&key)
    }

    pub fn load_queue(&self) -> &WorkQueue {
        &self.load_queue
    }

    pub fn unload_queue(&self) -> &WorkQueue {
        &self.unload_queue
    }

    /// Load up to `max_count` queued chunks.
    ///
    /// Store calls for different keys run concurrently; results are applied
    /// in queue order. A failed load is logged and dropped; the next
    /// visibility refresh or explicit pin requests it again. If this future
    /// is dropped before it finishes, the batch goes back on the load queue.
    pub async fn drain_loads(&mut self, max_count: usize) -> usize {
        let popped: Vec<(ChunkKey, Priority)> =
            std::iter::from_fn(|| self.load_queue.pop()).take(max_count).collect();
        if popped.is_empty() {
            return 0;
        }

        // Marked before any I/O starts so nothing re-queues these keys
        self.in_flight.extend(popped.iter().map(|(key, _)| *key));
        let batch = InFlightBatch {
            in_flight: &mut self.in_flight,
            queue: &mut self.load_queue,
            entries: popped,
        };

        let mut tasks = JoinSet::new();
        for (index, (key, _)) in batch.entries.iter().copied().enumerate() {
            let store = Arc::clone(&self.store);
            tasks.spawn(async move { (index, store.generate_or_read(key).await) });
        }

        let mut results: Vec<Option<Result<S::Content>>> =
            batch.entries.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => log::error!(target: LOG_TARGET, "chunk load task panicked: {}", e),
            }
        }

        let mut loaded = 0;
        for ((key, _), result) in batch.finish().into_iter().zip(results) {
            match result {
                Some(Ok(content)) => {
                    let sticky = self.pins.is_sticky(key);
                    self.resident.record_load(key, content, sticky);
                    self.stats.chunks_loaded += 1;
                    loaded += 1;
                }
                Some(Err(e)) => {
                    log::warn!(target: LOG_TARGET, "dropping load of {}: {}", key, e);
                    self.stats.load_failures += 1;
                }
                None => {
                    self.stats.load_failures += 1;
                }
            }
        }
        loaded
    }

    /// Unload up to `max_count` queued chunks.
    ///
    /// Pin state is re-checked for each entry. Dirty chunks are written first;
    /// if the write fails the chunk stays resident and dirty.
    pub async fn drain_unloads(&mut self, max_count: usize) -> usize {
        let mut unloaded = 0;
        for key in self.unload_queue.pop_many(max_count) {
            let Some(chunk) = self.resident.peek(key) else {
                continue;
            };
            if self.pins.is_pinned(key, &self.visibility) {
                log::debug!(target: LOG_TARGET, "unload of {} aborted, pinned again", key);
                self.stats.unloads_aborted += 1;
                continue;
            }

            if chunk.is_dirty() {
                match self.store.write(key, chunk.content()).await {
                    Ok(()) => self.stats.chunks_written += 1,
                    Err(e) => {
                        log::warn!(
                            target: LOG_TARGET,
                            "keeping {} resident, write failed: {}",
                            key,
                            e
                        );
                        self.stats.write_failures += 1;
                        continue;
                    }
                }
            }

            self.evict(key);
            unloaded += 1;
        }
        unloaded
    }

    /// One scheduling pass: bounded loads, then bounded unloads.
    pub async fn tick(&mut self) -> TickReport {
        let loaded = self.drain_loads(self.config.max_loads_per_tick).await;
        let unloaded = self.drain_unloads(self.config.max_unloads_per_tick).await;
        TickReport { loaded, unloaded }
    }

    /// Queue every resident, unpinned chunk idle for longer than the
    /// staleness threshold. Returns how many were queued.
    pub fn sweep(&mut self) -> usize {
        let mut stale = self.resident.stale_keys(Instant::now(), self.config.stale_after());
        stale.sort();

        let queued = stale.into_iter().filter(|key| self.enqueue_unload(*key)).count();
        if queued > 0 {
            log::debug!(target: LOG_TARGET, "idle sweep queued {} chunks", queued);
        }
        self.stats.sweep_candidates += queued as u64;
        queued
    }

    /// Persist every dirty resident chunk without evicting it.
    ///
    /// Returns how many chunks were written.
    pub async fn flush_dirty(&mut self) -> usize {
        let mut dirty = self.resident.dirty_keys();
        dirty.sort();

        let mut written = 0;
        for key in dirty {
            let Some(chunk) = self.resident.peek(key) else {
                continue;
            };
            match self.store.write(key, chunk.content()).await {
                Ok(()) => {
                    self.resident.clear_dirty(key);
                    self.stats.chunks_written += 1;
                    written += 1;
                }
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "flush of {} failed: {}", key, e);
                    self.stats.write_failures += 1;
                }
            }
        }
        written
    }

    /// Handle for publishing and subscribing outside the manager.
    pub(crate) fn event_bus(&self) -> EventBus<S::Content> {
        self.resident.events().clone()
    }

    pub fn stats(&self) -> &StreamingStats {
        &self.stats
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Remove a chunk that has already been cleared for eviction.
    fn evict(&mut self, key: ChunkKey) {
        assert!(
            !self.pins.is_pinned(key, &self.visibility),
            "attempted to evict pinned chunk {}",
            key
        );
        if self.resident.remove(key).is_some() {
            self.resident.events().emit(ChunkEvent::Unloaded { key });
            self.stats.chunks_unloaded += 1;
            log::debug!(target: LOG_TARGET, "unloaded {}", key);
        }
    }
}

/// Loads popped off the queue whose results have not been applied yet.
///
/// Dropping the batch without calling `finish` puts every entry back at
/// the front of the load queue with its original priority.
struct InFlightBatch<'a> {
    in_flight: &'a mut HashSet<ChunkKey>,
    queue: &'a mut WorkQueue,
    entries: Vec<(ChunkKey, Priority)>,
}

impl InFlightBatch<'_> {
    /// Clear the in-flight marks and hand the entries back for applying.
    fn finish(mut self) -> Vec<(ChunkKey, Priority)> {
        let entries = std::mem::take(&mut self.entries);
        for (key, _) in &entries {
            self.in_flight.remove(key);
        }
        entries
    }
}

impl Drop for InFlightBatch<'_> {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        log::debug!(
            target: LOG_TARGET,
            "load drain cancelled, requeueing {} chunks",
            self.entries.len()
        );
        for (key, priority) in self.entries.drain(..).rev() {
            self.in_flight.remove(&key);
            self.queue.requeue(key, priority);
        }
    }
}
