//! In-memory store.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{BoardStore, BoxFuture, SavedBoard, StorageError, StorageResult};

struct Entry {
    json: String,
    preview: Option<Vec<u8>>,
}

/// In-memory store for tests and ephemeral boards.
#[derive(Default)]
pub struct MemoryStore {
    boards: RwLock<HashMap<String, Entry>>,
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw JSON snapshot, e.g. a generated board awaiting first open.
    pub fn insert_json(&self, id: impl Into<String>, json: impl Into<String>) -> StorageResult<()> {
        let mut boards = self.boards.write().map_err(lock_error)?;
        boards.insert(
            id.into(),
            Entry {
                json: json.into(),
                preview: None,
            },
        );
        Ok(())
    }
}

impl BoardStore for MemoryStore {
    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<String>> {
        let id = id.to_string();
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            boards
                .get(&id)
                .map(|entry| entry.json.clone())
                .ok_or(StorageError::NotFound(id))
        })
    }

    fn load_preview(&self, id: &str) -> BoxFuture<'_, StorageResult<Option<Vec<u8>>>> {
        let id = id.to_string();
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            boards
                .get(&id)
                .map(|entry| entry.preview.clone())
                .ok_or(StorageError::NotFound(id))
        })
    }

    fn save(&self, id: &str, board: &SavedBoard) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        let json = board.snapshot.to_json();
        let preview = board.preview.clone();
        Box::pin(async move {
            let json = json.map_err(|e| StorageError::Serialization(e.to_string()))?;
            let mut boards = self.boards.write().map_err(lock_error)?;
            boards.insert(id, Entry { json, preview });
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut boards = self.boards.write().map_err(lock_error)?;
            boards.remove(&id);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            Ok(boards.keys().cloned().collect())
        })
    }

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let id = id.to_string();
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            Ok(boards.contains_key(&id))
        })
    }
}
