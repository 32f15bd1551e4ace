//! Chunkstream demo driver - walks viewers across a disk-backed world.
//!
//! Usage: cargo run --release -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Streaming config JSON (default: built-in defaults)
//!   --dir <PATH>      Region directory (default: <tmp>/chunkstream-demo)
//!   --steps <N>       Number of walk steps (default: 24)
//!   --radius <R>      Viewer radius override (default: config view_radius)
//!
//! Output structure:
//!   <dir>/
//!     x_<x>/chunk_<x>_<z>.rkc   # LZ4-compressed JSON column per chunk

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use chunkstream::core::{Error, Result, StreamingConfig, logging};
use chunkstream::streaming::{
    self, ChunkEvent, ChunkKey, ChunkManager, DiskRegionStore, TicketId, ViewerId,
};

/// Demo chunk payload: a flat column of heights plus a list of placed props.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Column {
    heights: Vec<u16>,
    props: Vec<String>,
}

fn flat_world(key: ChunkKey) -> Result<Column> {
    // Gentle terraces so neighbouring chunks differ on disk
    let base = 64 + (key.x.rem_euclid(4) + key.z.rem_euclid(4)) as u16;
    Ok(Column {
        heights: vec![base; 16 * 16],
        props: Vec::new(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => StreamingConfig::load(PathBuf::from(path).as_path())?,
        None => StreamingConfig::default(),
    };
    if let Some(radius) = parse_u32_arg(&args, "--radius") {
        config.view_radius = radius;
    }
    config.validate()?;

    let dir = parse_str_arg(&args, "--dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("chunkstream-demo"));
    let steps = parse_u32_arg(&args, "--steps").unwrap_or(24) as i32;
    let radius = config.view_radius;
    let reach = radius as i32;
    let settle = config.tick_interval() * 4;

    println!("=== Chunkstream Demo ===");
    println!("Regions: {}", dir.display());
    println!("Radius:  {}", radius);
    println!("Steps:   {}", steps);
    println!();

    let store = Arc::new(DiskRegionStore::new(&dir, flat_world));
    let manager = ChunkManager::new(store, config);
    let handle = streaming::spawn(manager);

    let mut events = handle.subscribe();
    let counter = tokio::spawn(async move {
        let (mut loaded, mut unloaded) = (0usize, 0usize);
        loop {
            match events.recv().await {
                Ok(ChunkEvent::Loaded { key, .. }) => {
                    loaded += 1;
                    log::debug!(target: logging::LOG_TARGET, "loaded {}", key);
                }
                Ok(ChunkEvent::Unloaded { key }) => {
                    unloaded += 1;
                    log::debug!(target: logging::LOG_TARGET, "unloaded {}", key);
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!(
                        target: logging::LOG_TARGET,
                        "event subscriber lagged by {}",
                        skipped
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
        (loaded, unloaded)
    });

    let spawn_chunk = ChunkKey::new(0, 0);
    let walker = ViewerId(1);
    let watcher = ViewerId(2);

    // The spawn chunk stays resident no matter where the viewers go
    handle.set_sticky(spawn_chunk, true)?;
    handle.add_ticket(ChunkKey::new(-reach * 3, 0), TicketId(1))?;
    handle.update_viewer(watcher, ChunkKey::new(0, -reach * 2), radius).await?;

    let start = Instant::now();
    for step in 0..=steps {
        let center = ChunkKey::new(step * 2, 0);
        let diff = handle.update_viewer(walker, center, radius).await?;
        log::info!(
            target: logging::LOG_TARGET,
            "step {:>3}: walker at {} (+{} -{})",
            step,
            center,
            diff.entered.len(),
            diff.left.len()
        );
        tokio::time::sleep(settle).await;

        // Drop a prop where the walker stands so the chunk has to be written back
        let prop = format!("marker-{}", step);
        handle.modify(center, move |column: &mut Column| column.props.push(prop)).await?;
    }

    handle.remove_viewer(watcher)?;
    handle.remove_ticket(ChunkKey::new(-reach * 3, 0), TicketId(1))?;
    tokio::time::sleep(settle * 4).await;

    let stats = handle.shutdown().await?;
    drop(handle);
    let (loaded, unloaded) = counter
        .await
        .map_err(|e| Error::Generation(format!("event counter task failed: {}", e)))?;

    println!();
    println!("=== Demo Complete ({:.1}s) ===", start.elapsed().as_secs_f64());
    println!("Events: {} loaded, {} unloaded", loaded, unloaded);
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).map_err(|e| Error::Codec(e.to_string()))?
    );

    Ok(())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}
