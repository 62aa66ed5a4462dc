//! Modelboard Core Library
//!
//! Collaborative diagram-state engine for event-storming and UML boards:
//! a replicated board document, the mutation API over it, containment and
//! attachment resolution, connection routing, selection gestures and history.

pub mod config;
pub mod crdt;
pub mod error;
pub mod history;
pub mod model;
pub mod mutation;
pub mod projection;
pub mod resolver;
pub mod routing;
pub mod seed;
pub mod selection;
pub mod session;
pub mod storage;
pub mod sync;

pub use config::EngineConfig;
pub use crdt::{BoardDocument, ChangeOrigin, ListenerId, Transaction};
pub use error::{BoardError, BoardResult};
pub use history::History;
pub use model::{BoardKind, Connection, ConnectionKind, Item, ItemId, ItemKind, ItemTag, NewConnection, NewItem};
pub use mutation::DeleteSummary;
pub use projection::Projection;
pub use routing::RoutingError;
pub use seed::{BoardSnapshot, SeedError, SeedOutcome, SeedPlan};
pub use selection::{ControllerState, Frame, Modifiers, SelectionController, TransformInput};
pub use session::{BoardSession, SessionEvent};
pub use storage::{BoardStore, MemoryStore, SavedBoard, StorageError};
pub use sync::{ConnectionState, SyncEvent, SyncTransport, TransportSignal};

#[cfg(not(target_arch = "wasm32"))]
pub use storage::FileStore;
#[cfg(not(target_arch = "wasm32"))]
pub use sync::NativeWebSocket;
