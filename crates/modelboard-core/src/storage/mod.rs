//! Persistence collaborator for board snapshots.
//!
//! Stores are only consulted when a board is opened (to seed an empty
//! document) and on explicit save. Live collaboration goes through the relay.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

pub use memory::MemoryStore;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStore;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::seed::BoardSnapshot;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Board not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for async operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What an explicit save hands to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedBoard {
    pub snapshot: BoardSnapshot,
    /// Rendered preview image, opaque to the engine.
    pub preview: Option<Vec<u8>>,
}

/// Trait for board storage backends.
pub trait BoardStore: Send + Sync {
    /// Load the raw JSON snapshot of a board.
    ///
    /// The JSON is returned unparsed so a malformed snapshot surfaces as a
    /// seed failure rather than a storage error.
    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<String>>;

    /// Load the preview saved with a board, if any.
    fn load_preview(&self, id: &str) -> BoxFuture<'_, StorageResult<Option<Vec<u8>>>>;

    /// Save a board snapshot and its preview.
    fn save(&self, id: &str, board: &SavedBoard) -> BoxFuture<'_, StorageResult<()>>;

    /// Delete a board.
    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// List all board IDs.
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    /// Check if a board exists.
    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>>;
}

/// Drive a store future to completion. The stores never park, so a no-op
/// waker is enough.
#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, Waker};

    let mut cx = Context::from_waker(Waker::noop());
    let mut f = std::pin::pin!(f);
    loop {
        if let Poll::Ready(output) = f.as_mut().poll(&mut cx) {
            return output;
        }
    }
}
