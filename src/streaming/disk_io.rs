//! Chunk serialization and disk I/O

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::error::{Error, Result};
use crate::streaming::coord::ChunkKey;
use crate::streaming::store::{Generator, RegionStore};

/// Serialize chunk content to bytes (uncompressed)
pub fn serialize_chunk<C: Serialize>(content: &C) -> Result<Vec<u8>> {
    serde_json::to_vec(content).map_err(|e| Error::Codec(e.to_string()))
}

/// Deserialize chunk content from bytes (uncompressed)
pub fn deserialize_chunk<C: DeserializeOwned>(data: &[u8]) -> Result<C> {
    serde_json::from_slice(data).map_err(|e| Error::Codec(e.to_string()))
}

/// Serialize and compress chunk content using LZ4
pub fn compress_chunk<C: Serialize>(content: &C) -> Result<Vec<u8>> {
    let serialized = serialize_chunk(content)?;
    Ok(lz4_flex::compress_prepend_size(&serialized))
}

/// Decompress and deserialize chunk content
pub fn decompress_chunk<C: DeserializeOwned>(data: &[u8]) -> Result<C> {
    let decompressed = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| Error::Codec(format!("LZ4 decompression failed: {}", e)))?;
    deserialize_chunk(&decompressed)
}

/// Get the file path for a chunk
pub fn chunk_path(base_dir: &Path, key: ChunkKey) -> PathBuf {
    // Bucket by X so no single directory grows without bound
    // Format: base_dir/x_{x}/chunk_{x}_{z}.rkc
    base_dir
        .join(format!("x_{}", key.x))
        .join(format!("chunk_{}_{}.rkc", key.x, key.z))
}

/// Save chunk content to disk (compressed)
///
/// Writes to a sibling temp file first and renames it into place, so a
/// crash mid-write never leaves a truncated chunk behind.
pub async fn save_chunk<C: Serialize>(base_dir: &Path, key: ChunkKey, content: &C) -> Result<()> {
    let path = chunk_path(base_dir, key);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let compressed = compress_chunk(content)?;
    let tmp = path.with_extension("rkc.tmp");
    tokio::fs::write(&tmp, compressed).await?;
    tokio::fs::rename(&tmp, &path).await?;

    Ok(())
}

/// Load chunk content from disk (if it exists)
pub async fn load_chunk<C: DeserializeOwned>(base_dir: &Path, key: ChunkKey) -> Result<Option<C>> {
    let path = chunk_path(base_dir, key);

    let compressed = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(decompress_chunk(&compressed)?))
}

/// Delete a chunk from disk
pub async fn delete_chunk(base_dir: &Path, key: ChunkKey) -> Result<()> {
    match tokio::fs::remove_file(chunk_path(base_dir, key)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Check if a chunk exists on disk
pub async fn chunk_exists(base_dir: &Path, key: ChunkKey) -> bool {
    tokio::fs::try_exists(chunk_path(base_dir, key)).await.unwrap_or(false)
}

/// Region store backed by one compressed file per chunk.
///
/// Chunks missing on disk are produced by the generator, which runs on
/// tokio's blocking pool.
pub struct DiskRegionStore<G> {
    base_dir: PathBuf,
    generator: Arc<G>,
}

impl<G: Generator> DiskRegionStore<G> {
    pub fn new(base_dir: impl Into<PathBuf>, generator: G) -> Self {
        Self {
            base_dir: base_dir.into(),
            generator: Arc::new(generator),
        }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl<G> RegionStore for DiskRegionStore<G>
where
    G: Generator,
    G::Content: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Content = G::Content;

    async fn generate_or_read(&self, key: ChunkKey) -> Result<G::Content> {
        if let Some(content) = load_chunk(&self.base_dir, key).await? {
            return Ok(content);
        }

        let generator = Arc::clone(&self.generator);
        tokio::task::spawn_blocking(move || generator.generate(key))
            .await
            .map_err(|e| Error::Generation(format!("generator task for {} failed: {}", key, e)))?
    }

    async fn write(&self, key: ChunkKey, content: &G::Content) -> Result<()> {
        save_chunk(&self.base_dir, key, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Column {
        heights: Vec<u8>,
        biome: String,
    }

    fn flat(key: ChunkKey) -> Result<Column> {
        Ok(Column {
            heights: vec![64; 16],
            biome: format!("plains{}", key),
        })
    }

    #[test]
    fn test_chunk_path() {
        let base = Path::new("/tmp/chunks");
        let path = chunk_path(base, ChunkKey::new(5, -3));

        assert_eq!(path, PathBuf::from("/tmp/chunks/x_5/chunk_5_-3.rkc"));
    }

    #[test]
    fn test_compress_decompress_chunk() {
        let column = flat(ChunkKey::new(1, 2)).unwrap();

        let compressed = compress_chunk(&column).expect("compression failed");
        assert!(!compressed.is_empty());

        let decompressed: Column = decompress_chunk(&compressed).expect("decompression failed");
        assert_eq!(decompressed, column);
    }

    #[test]
    fn test_decompress_garbage() {
        let result: Result<Column> = decompress_chunk(&[1, 2, 3]);
        assert!(matches!(result, Err(Error::Codec(_))));
    }

    #[tokio::test]
    async fn test_save_and_load_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let key = ChunkKey::new(5, -3);
        let column = flat(key).unwrap();

        save_chunk(dir.path(), key, &column).await.expect("save failed");
        assert!(chunk_exists(dir.path(), key).await);

        let loaded: Column = load_chunk(dir.path(), key)
            .await
            .expect("load failed")
            .expect("chunk not found");
        assert_eq!(loaded, column);

        delete_chunk(dir.path(), key).await.expect("delete failed");
        assert!(!chunk_exists(dir.path(), key).await);
        // Deleting twice is fine
        delete_chunk(dir.path(), key).await.expect("delete failed");
    }

    #[tokio::test]
    async fn test_load_nonexistent_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let result: Option<Column> = load_chunk(dir.path(), ChunkKey::new(999, 999))
            .await
            .expect("load should not error");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_store_generates_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskRegionStore::new(dir.path(), flat);
        let key = ChunkKey::new(0, 7);

        let mut column = store.generate_or_read(key).await.unwrap();
        assert_eq!(column.biome, "plains<0, 7>");

        column.biome = "desert".to_string();
        store.write(key, &column).await.unwrap();

        let reread = store.generate_or_read(key).await.unwrap();
        assert_eq!(reread.biome, "desert");
        assert_eq!(store.base_dir(), dir.path());
    }

    #[tokio::test]
    async fn test_store_generation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskRegionStore::new(dir.path(), |key: ChunkKey| -> Result<Column> {
            Err(Error::Generation(format!("no terrain at {}", key)))
        });

        assert!(store.generate_or_read(ChunkKey::new(1, 1)).await.is_err());
    }
}
