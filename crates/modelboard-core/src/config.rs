//! Engine configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, BoardResult};

/// Default distance (layout units) within which a sticky item attaches to a host.
pub const DEFAULT_SNAP_THRESHOLD: f64 = 15.0;
/// Smallest width/height a transform may produce.
pub const DEFAULT_MIN_ITEM_SIZE: f64 = 5.0;
/// Maximum retained undo steps.
pub const DEFAULT_MAX_UNDO_STEPS: usize = 100;
/// Default item size used when a snapshot omits dimensions.
pub const DEFAULT_ITEM_WIDTH: f64 = 220.0;
pub const DEFAULT_ITEM_HEIGHT: f64 = 100.0;

/// Tunables for a board session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Expansion applied to host boxes when testing attachment.
    pub snap_threshold: f64,
    /// Clamp for transformed width/height.
    pub min_item_size: f64,
    /// Cap on the undo stack.
    pub max_undo_steps: usize,
    /// Commits closer together than this are merged into one undo step.
    /// Zero keeps every transaction separately undoable.
    pub undo_merge_interval_ms: i64,
    pub default_item_width: f64,
    pub default_item_height: f64,
    /// Pointer slop when hit testing connection segments.
    pub hit_tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snap_threshold: DEFAULT_SNAP_THRESHOLD,
            min_item_size: DEFAULT_MIN_ITEM_SIZE,
            max_undo_steps: DEFAULT_MAX_UNDO_STEPS,
            undo_merge_interval_ms: 0,
            default_item_width: DEFAULT_ITEM_WIDTH,
            default_item_height: DEFAULT_ITEM_HEIGHT,
            hit_tolerance: 4.0,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> BoardResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BoardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> BoardResult<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| BoardError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    fn validate(&self) -> BoardResult<()> {
        if self.snap_threshold < 0.0 {
            return Err(BoardError::Config("snap_threshold must not be negative".to_string()));
        }
        if self.min_item_size <= 0.0 {
            return Err(BoardError::Config("min_item_size must be positive".to_string()));
        }
        if self.default_item_width <= 0.0 || self.default_item_height <= 0.0 {
            return Err(BoardError::Config("default item size must be positive".to_string()));
        }
        Ok(())
    }
}
