//! Loro document schema and transactions.

use std::collections::HashMap;

use loro::{CommitOptions, ExportMode, LoroDoc, LoroList, LoroMap, LoroValue, ValueOrContainer, VersionVector};

use super::convert::{child_map, connection_to_loro, connection_update_loro, item_to_loro, item_update_loro};
use crate::config::EngineConfig;
use crate::error::{BoardError, BoardResult};
use crate::history::History;
use crate::model::{BoardKind, Connection, ConnectionId, Item, ItemId};
use crate::projection::Projection;

/// Key for the items map in the document.
pub const ITEMS_KEY: &str = "items";
/// Key for the item z-order list.
pub const ITEM_ORDER_KEY: &str = "item_order";
/// Key for the connections map.
pub const CONNECTIONS_KEY: &str = "connections";
/// Key for the connection order list.
pub const CONNECTION_ORDER_KEY: &str = "connection_order";
/// Key for the board metadata map.
pub const META_KEY: &str = "meta";
/// Key for the board kind inside the metadata map.
pub const BOARD_KIND_KEY: &str = "board_kind";

/// Commit origin used for seeding; excluded from undo.
pub const SEED_ORIGIN: &str = "seed";
const LOCAL_ORIGIN: &str = "local";

/// Where a change to the document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A transaction committed by this client.
    Local,
    /// Operations imported from the relay or a peer.
    Remote,
    /// An undo or redo step.
    History,
    /// Initial population from a board snapshot.
    Seed,
}

impl ChangeOrigin {
    fn commit_origin(self) -> &'static str {
        match self {
            ChangeOrigin::Seed => SEED_ORIGIN,
            _ => LOCAL_ORIGIN,
        }
    }
}

/// Handle returned by [`BoardDocument::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ChangeListener = Box<dyn FnMut(&Projection, ChangeOrigin)>;

/// Find the index of a string value in a list.
fn position_in(list: &LoroList, id: &str) -> Option<usize> {
    (0..list.len()).find(|&i| {
        matches!(list.get(i), Some(ValueOrContainer::Value(LoroValue::String(s))) if s.as_ref() == id)
    })
}

/// Mutating access to the board inside one commit.
///
/// Reads through the transaction see its own uncommitted writes layered on
/// top of the projection taken when it started.
pub struct Transaction<'a> {
    base: &'a Projection,
    items: LoroMap,
    item_order: LoroList,
    connections: LoroMap,
    connection_order: LoroList,
    meta: LoroMap,
    item_overlay: HashMap<ItemId, Option<Item>>,
    connection_overlay: HashMap<ConnectionId, Option<Connection>>,
    writes: usize,
}

impl<'a> Transaction<'a> {
    fn new(doc: &LoroDoc, base: &'a Projection) -> Self {
        Self {
            base,
            items: doc.get_map(ITEMS_KEY),
            item_order: doc.get_list(ITEM_ORDER_KEY),
            connections: doc.get_map(CONNECTIONS_KEY),
            connection_order: doc.get_list(CONNECTION_ORDER_KEY),
            meta: doc.get_map(META_KEY),
            item_overlay: HashMap::new(),
            connection_overlay: HashMap::new(),
            writes: 0,
        }
    }

    /// Current state of an item, including writes made in this transaction.
    pub fn item(&self, id: &str) -> Option<&Item> {
        match self.item_overlay.get(id) {
            Some(entry) => entry.as_ref(),
            None => self.base.item(id),
        }
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        match self.connection_overlay.get(id) {
            Some(entry) => entry.as_ref(),
            None => self.base.connection(id),
        }
    }

    /// Ids of every live item, in z-order, as seen by this transaction.
    pub fn item_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self
            .base
            .items()
            .iter()
            .filter(|item| self.item(&item.id).is_some())
            .map(|item| item.id.clone())
            .collect();
        for (id, entry) in &self.item_overlay {
            if entry.is_some() && self.base.item(id).is_none() {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Ids of every live connection as seen by this transaction.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .base
            .connections()
            .iter()
            .filter(|conn| self.connection(&conn.id).is_some())
            .map(|conn| conn.id.clone())
            .collect();
        for (id, entry) in &self.connection_overlay {
            if entry.is_some() && self.base.connection(id).is_none() {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Append a new item on top of the z-order.
    pub fn insert_item(&mut self, item: Item) -> BoardResult<()> {
        let map = self.items.insert_container(&item.id, LoroMap::new())?;
        item_to_loro(&item, &map)?;
        self.item_order.push(item.id.as_str())?;
        self.writes += 1;
        self.item_overlay.insert(item.id.clone(), Some(item));
        Ok(())
    }

    /// Overwrite an item. Returns false if it no longer exists.
    pub fn update_item(&mut self, next: &Item) -> BoardResult<bool> {
        let Some(current) = self.item(&next.id).cloned() else {
            return Ok(false);
        };
        if &current == next {
            return Ok(true);
        }
        let map = child_map(&self.items, &next.id)?;
        self.writes += item_update_loro(&current, next, &map)?;
        self.item_overlay.insert(next.id.clone(), Some(next.clone()));
        Ok(true)
    }

    /// Remove an item record. Connections are not touched.
    pub fn remove_item(&mut self, id: &str) -> BoardResult<bool> {
        if self.item(id).is_none() {
            return Ok(false);
        }
        self.items.delete(id)?;
        if let Some(pos) = position_in(&self.item_order, id) {
            self.item_order.delete(pos, 1)?;
        }
        self.writes += 1;
        self.item_overlay.insert(id.to_string(), None);
        Ok(true)
    }

    pub fn insert_connection(&mut self, connection: Connection) -> BoardResult<()> {
        let map = self.connections.insert_container(&connection.id, LoroMap::new())?;
        connection_to_loro(&connection, &map)?;
        self.connection_order.push(connection.id.as_str())?;
        self.writes += 1;
        self.connection_overlay.insert(connection.id.clone(), Some(connection));
        Ok(())
    }

    /// Overwrite a connection. Returns false if it no longer exists.
    pub fn update_connection(&mut self, next: &Connection) -> BoardResult<bool> {
        let Some(current) = self.connection(&next.id).cloned() else {
            return Ok(false);
        };
        if &current == next {
            return Ok(true);
        }
        let map = child_map(&self.connections, &next.id)?;
        self.writes += connection_update_loro(&current, next, &map)?;
        self.connection_overlay.insert(next.id.clone(), Some(next.clone()));
        Ok(true)
    }

    pub fn remove_connection(&mut self, id: &str) -> BoardResult<bool> {
        if self.connection(id).is_none() {
            return Ok(false);
        }
        self.connections.delete(id)?;
        if let Some(pos) = position_in(&self.connection_order, id) {
            self.connection_order.delete(pos, 1)?;
        }
        self.writes += 1;
        self.connection_overlay.insert(id.to_string(), None);
        Ok(true)
    }

    pub fn set_board_kind(&mut self, kind: BoardKind) -> BoardResult<()> {
        self.meta.insert(BOARD_KIND_KEY, kind.as_str())?;
        self.writes += 1;
        Ok(())
    }
}

/// A CRDT-backed board document.
///
/// Wraps a `LoroDoc`, the [`History`] over it, and the [`Projection`] that is
/// rebuilt after every local, remote or history change.
pub struct BoardDocument {
    doc: LoroDoc,
    history: History,
    projection: Projection,
    listeners: Vec<(ListenerId, ChangeListener)>,
    next_listener: u64,
    revision: u64,
}

impl BoardDocument {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self::from_doc(LoroDoc::new(), config)
    }

    /// Create a document from a snapshot. The imported state is not undoable.
    pub fn from_snapshot(bytes: &[u8], config: &EngineConfig) -> BoardResult<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes)?;
        Ok(Self::from_doc(doc, config))
    }

    fn from_doc(doc: LoroDoc, config: &EngineConfig) -> Self {
        let history = History::new(&doc, config);
        let projection = Projection::from_doc(&doc, 0);
        Self {
            doc,
            history,
            projection,
            listeners: Vec::new(),
            next_listener: 0,
            revision: 0,
        }
    }

    /// Get the underlying LoroDoc.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn peer_id(&self) -> u64 {
        self.doc.peer_id()
    }

    /// The current read-only snapshot of the board.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Run `f` as one local transaction.
    ///
    /// Everything `f` writes is committed together and reaches peers as a
    /// unit. Loro has no rollback, so `f` must finish validating before its
    /// first write; writes made before an error are still committed.
    pub fn apply_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Transaction<'_>) -> BoardResult<T>,
    ) -> BoardResult<T> {
        self.apply_transaction_with_origin(ChangeOrigin::Local, f)
    }

    pub(crate) fn apply_transaction_with_origin<T>(
        &mut self,
        origin: ChangeOrigin,
        f: impl FnOnce(&mut Transaction<'_>) -> BoardResult<T>,
    ) -> BoardResult<T> {
        let (result, writes) = {
            let mut txn = Transaction::new(&self.doc, &self.projection);
            let result = f(&mut txn);
            (result, txn.writes)
        };
        if writes > 0 {
            if let Err(e) = &result {
                log::warn!("Transaction failed after {} writes: {}", writes, e);
            }
            self.doc
                .commit_with(CommitOptions::new().origin(origin.commit_origin()));
            log::debug!("Committed {} writes ({:?})", writes, origin);
            self.refresh(origin);
        }
        result
    }

    /// Register a callback fired after every change with the fresh projection.
    pub fn on_change(&mut self, listener: impl FnMut(&Projection, ChangeOrigin) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Rebuild the projection and notify listeners.
    fn refresh(&mut self, origin: ChangeOrigin) {
        self.revision += 1;
        self.projection = Projection::from_doc(&self.doc, self.revision);
        for (_, listener) in self.listeners.iter_mut() {
            listener(&self.projection, origin);
        }
    }

    // --- Replication ---

    /// Export the document as a snapshot (full state).
    pub fn export_snapshot(&self) -> BoardResult<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| BoardError::Encode(e.to_string()))
    }

    /// Export incremental updates since a version.
    pub fn export_updates(&self, since: &VersionVector) -> BoardResult<Vec<u8>> {
        self.doc
            .export(ExportMode::updates(since))
            .map_err(|e| BoardError::Encode(e.to_string()))
    }

    /// Import operations from the relay or another peer.
    pub fn import(&mut self, bytes: &[u8]) -> BoardResult<()> {
        let before = self.doc.oplog_vv();
        self.doc.import(bytes)?;
        if self.doc.oplog_vv() != before {
            self.refresh(ChangeOrigin::Remote);
        }
        Ok(())
    }

    /// Get the current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }

    // --- Undo/Redo API ---

    /// Undo the last local transaction. Returns false if there was nothing to undo.
    pub fn undo(&mut self) -> BoardResult<bool> {
        let undone = self.history.undo()?;
        if undone {
            self.refresh(ChangeOrigin::History);
        }
        Ok(undone)
    }

    /// Redo the last undone transaction.
    pub fn redo(&mut self) -> BoardResult<bool> {
        let redone = self.history.redo()?;
        if redone {
            self.refresh(ChangeOrigin::History);
        }
        Ok(redone)
    }

    pub(crate) fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }
}

impl Default for BoardDocument {
    fn default() -> Self {
        Self::new()
    }
}
