//! Error types shared across the engine.

use thiserror::Error;

use crate::model::{ConnectionKind, ItemTag};
use crate::seed::SeedError;
use crate::storage::StorageError;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("CRDT error: {0}")]
    Crdt(#[from] loro::LoroError),
    #[error("Encoding error: {0}")]
    Encode(String),
    #[error("Connection endpoint {id} does not exist")]
    MissingEndpoint { id: String },
    #[error("{tag:?} items cannot be connected with a {kind:?} connection")]
    IllegalEndpoint { tag: ItemTag, kind: ConnectionKind },
    #[error("Seed error: {0}")]
    Seed(#[from] SeedError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type for engine operations.
pub type BoardResult<T> = Result<T, BoardError>;
