//! Chunkstream - world chunk streaming and eviction

pub mod core;
pub mod streaming;
