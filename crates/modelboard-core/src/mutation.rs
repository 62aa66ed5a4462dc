//! Mutation API.
//!
//! The only sanctioned way to change a board. Each call is exactly one
//! transaction on the [`BoardDocument`]. Ids that a peer already removed are
//! treated as no-ops, never as errors.
//!
//! Every call finishes its checks before the first write, so a call that
//! returns an error has changed nothing.

use std::collections::HashSet;

use uuid::Uuid;

use crate::crdt::{BoardDocument, Transaction};
use crate::error::{BoardError, BoardResult};
use crate::model::{
    BoardKind, Connection, ConnectionId, ConnectionKind, Item, ItemId, NewConnection, NewItem,
};

/// What a cascading delete removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub items: Vec<ItemId>,
    pub connections: Vec<ConnectionId>,
}

impl DeleteSummary {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.connections.is_empty()
    }
}

/// Drop references to items that `txn` cannot see.
fn scrub_references(txn: &Transaction<'_>, item: &mut Item) {
    if item.parent.as_deref().is_some_and(|p| txn.item(p).is_none()) {
        item.parent = None;
    }
    item.children.retain(|c| txn.item(c).is_some());
    item.kind.retain_references(|id| txn.item(id).is_some());
}

/// Check that both endpoints exist and accept connections.
fn validate_endpoints(txn: &Transaction<'_>, from: &str, to: &str, kind: ConnectionKind) -> BoardResult<()> {
    for id in [from, to] {
        let item = txn.item(id).ok_or_else(|| BoardError::MissingEndpoint { id: id.to_string() })?;
        if !item.tag().is_connectable() {
            return Err(BoardError::IllegalEndpoint { tag: item.tag(), kind });
        }
    }
    Ok(())
}

impl BoardDocument {
    /// Append a new item and return its freshly assigned id.
    ///
    /// A `parent` that does not exist is dropped; an existing parent gets the
    /// new id added to its `children`.
    pub fn add_item(&mut self, new_item: NewItem) -> BoardResult<ItemId> {
        let id = Uuid::new_v4().to_string();
        let mut item = new_item.into_item(id.clone());
        self.apply_transaction(|txn| {
            scrub_references(txn, &mut item);
            let parent = item.parent.as_deref().and_then(|p| txn.item(p)).cloned();
            let child_id = item.id.clone();
            txn.insert_item(item)?;
            if let Some(mut parent) = parent {
                parent.children.push(child_id);
                txn.update_item(&parent)?;
            }
            Ok(())
        })?;
        Ok(id)
    }

    /// Overwrite every field of the item with the same id.
    ///
    /// Returns `Ok(false)` without committing if the item is gone. References
    /// to items that no longer exist are dropped before writing.
    pub fn update_item(&mut self, item: &Item) -> BoardResult<bool> {
        if !self.projection().contains_item(&item.id) {
            log::debug!("update_item: {} no longer exists", item.id);
            return Ok(false);
        }
        let mut item = item.clone();
        self.apply_transaction(|txn| {
            scrub_references(txn, &mut item);
            txn.update_item(&item)
        })
    }

    /// Delete items, the one-level children of any containers among them,
    /// and every connection touching a deleted item, in one transaction.
    ///
    /// Surviving items that referenced a deleted item are updated in the same
    /// transaction so no dangling ids remain.
    pub fn delete_items_and_attached_connections(&mut self, ids: &[ItemId]) -> BoardResult<DeleteSummary> {
        let projection = self.projection();
        let mut doomed: Vec<ItemId> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for id in ids {
            let Some(item) = projection.item(id) else {
                continue;
            };
            if seen.insert(item.id.as_str()) {
                doomed.push(item.id.clone());
            }
            if item.tag().is_container() {
                for child in projection.children_of(&item.id) {
                    if seen.insert(child.id.as_str()) {
                        doomed.push(child.id.clone());
                    }
                }
            }
        }
        if doomed.is_empty() {
            return Ok(DeleteSummary::default());
        }
        let connections: Vec<ConnectionId> = projection
            .connections_touching(&seen)
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        let doomed_set: HashSet<ItemId> = doomed.iter().cloned().collect();
        let survivors: Vec<Item> = projection
            .items()
            .iter()
            .filter(|item| !doomed_set.contains(&item.id))
            .filter(|item| {
                item.parent.as_ref().is_some_and(|p| doomed_set.contains(p))
                    || item.children.iter().any(|c| doomed_set.contains(c))
                    || item.kind.references().into_iter().any(|r| doomed_set.contains(r))
            })
            .cloned()
            .collect();

        let summary = DeleteSummary {
            items: doomed.clone(),
            connections: connections.clone(),
        };
        self.apply_transaction(|txn| {
            for id in &connections {
                txn.remove_connection(id)?;
            }
            for id in &doomed {
                txn.remove_item(id)?;
            }
            for mut item in survivors {
                scrub_references(txn, &mut item);
                txn.update_item(&item)?;
            }
            Ok(())
        })?;
        log::debug!(
            "Deleted {} items and {} connections",
            summary.items.len(),
            summary.connections.len()
        );
        Ok(summary)
    }

    /// Add a connection between two existing, connectable items.
    pub fn add_connection(&mut self, new_connection: NewConnection) -> BoardResult<ConnectionId> {
        let id = Uuid::new_v4().to_string();
        let connection = new_connection.into_connection(id.clone());
        self.apply_transaction(|txn| {
            validate_endpoints(txn, &connection.from, &connection.to, connection.kind)?;
            txn.insert_connection(connection)
        })?;
        Ok(id)
    }

    /// Overwrite the connection with the same id.
    ///
    /// Returns `Ok(false)` if the connection or one of its endpoints is gone.
    pub fn update_connection(&mut self, connection: &Connection) -> BoardResult<bool> {
        let projection = self.projection();
        if projection.connection(&connection.id).is_none()
            || !projection.contains_item(&connection.from)
            || !projection.contains_item(&connection.to)
        {
            log::debug!("update_connection: {} is dangling", connection.id);
            return Ok(false);
        }
        self.apply_transaction(|txn| {
            validate_endpoints(txn, &connection.from, &connection.to, connection.kind)?;
            txn.update_connection(connection)
        })
    }

    /// Delete connections. Returns how many existed.
    pub fn delete_connections(&mut self, ids: &[ConnectionId]) -> BoardResult<usize> {
        self.apply_transaction(|txn| {
            let mut removed = 0;
            for id in ids {
                if txn.remove_connection(id)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    pub fn set_board_kind(&mut self, kind: BoardKind) -> BoardResult<()> {
        if self.projection().board_kind() == kind {
            return Ok(());
        }
        self.apply_transaction(|txn| txn.set_board_kind(kind))
    }
}
