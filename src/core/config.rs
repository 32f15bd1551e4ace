//! Streaming configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Tuning knobs for the chunk streaming manager and its service loop.
///
/// Every field has a default, so a JSON file only needs to name the values
/// it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Default viewer radius in region units.
    pub view_radius: u32,
    /// Chunks at or inside this distance from a viewer load with high priority.
    pub near_threshold: f64,
    /// Maximum loads started per `tick()`.
    pub max_loads_per_tick: usize,
    /// Maximum unloads processed per `tick()`.
    pub max_unloads_per_tick: usize,
    /// Unpinned chunks idle for longer than this are swept.
    pub stale_after_ms: u64,
    /// Period of the service drain pass.
    pub tick_interval_ms: u64,
    /// Period of the service idle sweep.
    pub sweep_interval_ms: u64,
    /// Buffer size of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            view_radius: 8,
            near_threshold: 2.0,
            max_loads_per_tick: 16,
            max_unloads_per_tick: 16,
            stale_after_ms: 30_000,
            tick_interval_ms: 50,
            sweep_interval_ms: 5_000,
            event_capacity: 1024,
        }
    }
}

impl StreamingConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_loads_per_tick == 0 || self.max_unloads_per_tick == 0 {
            return Err(Error::Config("drain bounds must be at least 1".into()));
        }
        if self.tick_interval_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(Error::Config("intervals must be non-zero".into()));
        }
        if !(self.near_threshold >= 0.0) {
            return Err(Error::Config(format!(
                "near_threshold must be >= 0, got {}",
                self.near_threshold
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Load from a JSON file and validate
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }
}
