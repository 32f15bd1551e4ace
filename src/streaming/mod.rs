//! Chunk residency, pinning and load/unload scheduling

pub mod coord;
pub mod disk_io;
pub mod events;
pub mod manager;
pub mod pins;
pub mod queue;
pub mod resident;
pub mod service;
pub mod store;
pub mod visibility;

pub use coord::ChunkKey;
pub use disk_io::{
    DiskRegionStore,
    compress_chunk, decompress_chunk,
    serialize_chunk, deserialize_chunk,
    save_chunk, load_chunk, delete_chunk, chunk_exists,
    chunk_path,
};
pub use events::{ChunkEvent, EventBus};
pub use manager::{ChunkManager, StreamingStats, TickReport};
pub use pins::{PinLedger, TicketId, VisibilityIndex};
pub use queue::{Priority, PushOutcome, WorkQueue};
pub use resident::{ResidentChunk, ResidentTable};
pub use service::{ServiceHandle, spawn};
pub use store::{Generator, MemoryStore, RegionStore};
pub use visibility::{ViewerId, VisibilityDiff, VisibilityTracker};
