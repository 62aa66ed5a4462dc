//! File-based store for native platforms.

use std::fs;
use std::path::{Path, PathBuf};

use super::{BoardStore, BoxFuture, SavedBoard, StorageError, StorageResult};

/// Stores each board as `<id>.json` with an optional `<id>.preview` next to it.
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path)
                .map_err(|e| StorageError::Io(format!("Failed to create storage directory: {}", e)))?;
        }
        Ok(Self { base_path })
    }

    /// Create a store in the default location.
    ///
    /// On Linux: `~/.local/share/modelboard/boards/`
    /// On Windows: `%LOCALAPPDATA%\modelboard\boards\`
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;
        Self::new(base.join("modelboard").join("boards"))
    }

    /// Path for a board file with the given extension.
    fn board_path(&self, id: &str, extension: &str) -> PathBuf {
        let safe_id: String = id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{}.{}", safe_id, extension))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl BoardStore for FileStore {
    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<String>> {
        let path = self.board_path(id, "json");
        let id = id.to_string();
        Box::pin(async move {
            if !path.exists() {
                return Err(StorageError::NotFound(id));
            }
            fs::read_to_string(&path)
                .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))
        })
    }

    fn load_preview(&self, id: &str) -> BoxFuture<'_, StorageResult<Option<Vec<u8>>>> {
        let json_path = self.board_path(id, "json");
        let path = self.board_path(id, "preview");
        let id = id.to_string();
        Box::pin(async move {
            if !json_path.exists() {
                return Err(StorageError::NotFound(id));
            }
            if !path.exists() {
                return Ok(None);
            }
            fs::read(&path)
                .map(Some)
                .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))
        })
    }

    fn save(&self, id: &str, board: &SavedBoard) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.board_path(id, "json");
        let preview_path = self.board_path(id, "preview");
        let json = board.snapshot.to_json();
        let preview = board.preview.clone();
        Box::pin(async move {
            let json = json.map_err(|e| StorageError::Serialization(e.to_string()))?;
            fs::write(&path, json)
                .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
            match preview {
                Some(bytes) => fs::write(&preview_path, bytes).map_err(|e| {
                    StorageError::Io(format!("Failed to write {}: {}", preview_path.display(), e))
                }),
                None if preview_path.exists() => fs::remove_file(&preview_path).map_err(|e| {
                    StorageError::Io(format!("Failed to delete {}: {}", preview_path.display(), e))
                }),
                None => Ok(()),
            }
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let paths = [self.board_path(id, "json"), self.board_path(id, "preview")];
        Box::pin(async move {
            for path in paths.iter().filter(|p| p.exists()) {
                fs::remove_file(path)
                    .map_err(|e| StorageError::Io(format!("Failed to delete {}: {}", path.display(), e)))?;
            }
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        let base = self.base_path.clone();
        Box::pin(async move {
            if !base.exists() {
                return Ok(vec![]);
            }
            let entries =
                fs::read_dir(&base).map_err(|e| StorageError::Io(format!("Failed to read directory: {}", e)))?;

            let mut ids = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json") {
                    if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                        ids.push(name.to_string());
                    }
                }
            }
            ids.sort();
            Ok(ids)
        })
    }

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let path = self.board_path(id, "json");
        Box::pin(async move { Ok(path.exists()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::BoardSnapshot;
    use crate::storage::block_on;
    use tempfile::tempdir;

    fn saved(name: &str, preview: Option<Vec<u8>>) -> SavedBoard {
        SavedBoard {
            snapshot: BoardSnapshot {
                board_kind: Some("UML".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            preview,
        }
    }

    #[test]
    fn test_file_store_save_load() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path().to_path_buf()).expect("Failed to create store");

        block_on(store.save("order-uml", &saved("Order", Some(vec![0x89, 0x50])))).expect("Failed to save");
        let json = block_on(store.load("order-uml")).expect("Failed to load");
        let snapshot = BoardSnapshot::from_json(&json).expect("Failed to parse");
        assert_eq!(snapshot.name.as_deref(), Some("Order"));
        assert_eq!(block_on(store.load_preview("order-uml")).expect("preview"), Some(vec![0x89, 0x50]));
    }

    #[test]
    fn test_file_store_save_without_preview_clears_old() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path().to_path_buf()).expect("Failed to create store");

        block_on(store.save("b", &saved("B", Some(vec![1])))).expect("Failed to save");
        block_on(store.save("b", &saved("B", None))).expect("Failed to save");
        assert_eq!(block_on(store.load_preview("b")).expect("preview"), None);
    }

    #[test]
    fn test_file_store_not_found() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path().to_path_buf()).expect("Failed to create store");
        assert!(matches!(block_on(store.load("nonexistent")), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_file_store_list_and_delete() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path().to_path_buf()).expect("Failed to create store");

        block_on(store.save("b1", &saved("one", Some(vec![1])))).expect("Failed to save");
        block_on(store.save("b2", &saved("two", None))).expect("Failed to save");
        assert_eq!(block_on(store.list()).expect("list"), vec!["b1".to_string(), "b2".to_string()]);

        block_on(store.delete("b1")).expect("Failed to delete");
        assert!(!block_on(store.exists("b1")).expect("exists"));
        assert!(!dir.path().join("b1.preview").exists());
    }

    #[test]
    fn test_file_store_sanitizes_id() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path().to_path_buf()).expect("Failed to create store");

        block_on(store.save("team/board:1", &saved("x", None))).expect("Failed to save");
        assert!(block_on(store.exists("team/board:1")).expect("exists"));
        assert!(dir.path().join("team_board_1.json").exists());
    }
}
