//! Transaction-granular undo/redo.
//!
//! Backed by Loro's `UndoManager`, which only records changes made by the
//! local peer. Remote imports are never undone here, and seed commits are
//! excluded by their origin.

use loro::{LoroDoc, UndoManager};

use crate::config::EngineConfig;
use crate::crdt::SEED_ORIGIN;
use crate::error::BoardResult;

/// Undo/redo stacks for one document.
pub struct History {
    undo_manager: UndoManager,
}

impl History {
    pub fn new(doc: &LoroDoc, config: &EngineConfig) -> Self {
        let mut undo_manager = UndoManager::new(doc);
        undo_manager.set_max_undo_steps(config.max_undo_steps);
        undo_manager.set_merge_interval(config.undo_merge_interval_ms);
        undo_manager.add_exclude_origin_prefix(SEED_ORIGIN);
        Self { undo_manager }
    }

    /// Undo the last change made by this peer.
    /// Returns true if undo was performed, false if nothing to undo.
    pub fn undo(&mut self) -> BoardResult<bool> {
        Ok(self.undo_manager.undo()?)
    }

    /// Redo the last undone change.
    pub fn redo(&mut self) -> BoardResult<bool> {
        Ok(self.undo_manager.redo()?)
    }

    pub fn can_undo(&self) -> bool {
        self.undo_manager.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo_manager.can_redo()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_manager.undo_count()
    }

    pub fn redo_count(&self) -> usize {
        self.undo_manager.redo_count()
    }

    /// Start a group. Transactions until [`History::end_group`] undo together.
    pub fn begin_group(&mut self) -> BoardResult<()> {
        Ok(self.undo_manager.group_start()?)
    }

    pub fn end_group(&mut self) {
        self.undo_manager.group_end();
    }

    /// Clear undo/redo history.
    pub fn clear(&self) {
        self.undo_manager.clear();
    }
}
