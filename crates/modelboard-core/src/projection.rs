//! Local Reactive Projection.
//!
//! Plain in-memory arrays materialized from the replicated sequences. The
//! document rebuilds it from scratch after every change; everything else in
//! the engine reads it synchronously.

use std::collections::{HashMap, HashSet};

use kurbo::{Point, Rect};
use loro::{LoroDoc, LoroValue, ValueOrContainer};

use crate::crdt::{
    BOARD_KIND_KEY, CONNECTION_ORDER_KEY, CONNECTIONS_KEY, ITEM_ORDER_KEY, ITEMS_KEY, META_KEY,
    connection_from_loro, item_from_loro,
};
use crate::model::{BoardKind, Connection, Item};

/// Read-only view of a board.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    items: Vec<Item>,
    connections: Vec<Connection>,
    board_kind: BoardKind,
    item_index: HashMap<String, usize>,
    connection_index: HashMap<String, usize>,
    revision: u64,
}

/// Ids from an order list, without duplicates.
fn order_ids(doc: &LoroDoc, key: &str) -> Vec<String> {
    let list = doc.get_list(key);
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(list.len());
    for i in 0..list.len() {
        if let Some(ValueOrContainer::Value(LoroValue::String(id))) = list.get(i) {
            let id = id.to_string();
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Records of a map in list order. Records missing from the order list
/// (possible after concurrent edits) follow, sorted by id so every peer
/// agrees on the result.
fn ordered_records<T>(
    doc: &LoroDoc,
    map_key: &str,
    order_key: &str,
    parse: impl Fn(&loro::LoroMapValue) -> Option<T>,
) -> Vec<T> {
    let LoroValue::Map(records) = doc.get_map(map_key).get_deep_value() else {
        return Vec::new();
    };
    let mut order = order_ids(doc, order_key);
    let listed: HashSet<&String> = order.iter().collect();
    let mut unlisted: Vec<String> = records
        .keys()
        .filter(|k| !listed.contains(k))
        .cloned()
        .collect();
    unlisted.sort();
    order.extend(unlisted);

    order
        .iter()
        .filter_map(|id| match records.get(id) {
            Some(LoroValue::Map(record)) => parse(record),
            _ => None,
        })
        .collect()
}

/// Settle references that concurrent edits can leave behind.
///
/// `parent` and payload ids must name live items, `children` is derived
/// from the `parent` links in z-order, and a connection needs both
/// endpoints. The stored records are left alone, so an item restored by
/// undo is picked up again.
fn repair_references(items: &mut [Item], connections: &mut Vec<Connection>) {
    let live: HashSet<String> = items.iter().map(|item| item.id.clone()).collect();
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for item in items.iter_mut() {
        if item.parent.as_ref().is_some_and(|p| *p == item.id || !live.contains(p)) {
            item.parent = None;
        }
        item.kind.retain_references(|id| live.contains(id));
        if let Some(parent) = &item.parent {
            children.entry(parent.clone()).or_default().push(item.id.clone());
        }
    }
    for item in items.iter_mut() {
        item.children = children.remove(&item.id).unwrap_or_default();
    }
    connections.retain(|conn| live.contains(&conn.from) && live.contains(&conn.to));
}

impl Projection {
    /// Materialize the current state of a Loro document.
    pub(crate) fn from_doc(doc: &LoroDoc, revision: u64) -> Self {
        let items = ordered_records(doc, ITEMS_KEY, ITEM_ORDER_KEY, item_from_loro);
        let connections = ordered_records(doc, CONNECTIONS_KEY, CONNECTION_ORDER_KEY, connection_from_loro);
        let board_kind = match doc.get_map(META_KEY).get(BOARD_KIND_KEY) {
            Some(ValueOrContainer::Value(LoroValue::String(kind))) => {
                BoardKind::parse(&kind.to_string()).unwrap_or_default()
            }
            _ => BoardKind::default(),
        };
        let mut projection = Self::from_parts(items, connections, board_kind);
        projection.revision = revision;
        projection
    }

    /// Build a projection from plain records, e.g. for a detached preview.
    pub fn from_parts(mut items: Vec<Item>, mut connections: Vec<Connection>, board_kind: BoardKind) -> Self {
        repair_references(&mut items, &mut connections);
        let item_index = items.iter().enumerate().map(|(i, item)| (item.id.clone(), i)).collect();
        let connection_index = connections
            .iter()
            .enumerate()
            .map(|(i, conn)| (conn.id.clone(), i))
            .collect();
        Self {
            items,
            connections,
            board_kind,
            item_index,
            connection_index,
            revision: 0,
        }
    }

    /// Items in z-order (last is topmost).
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn board_kind(&self) -> BoardKind {
        self.board_kind
    }

    /// Incremented on every change the document observes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True when the board has no items and no connections.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.connections.is_empty()
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.item_index.get(id).map(|&i| &self.items[i])
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connection_index.get(id).map(|&i| &self.connections[i])
    }

    pub fn contains_item(&self, id: &str) -> bool {
        self.item_index.contains_key(id)
    }

    /// Items whose `parent` is `id`, in z-order.
    pub fn children_of(&self, id: &str) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|item| item.parent.as_deref() == Some(id))
            .collect()
    }

    /// Connections with either endpoint in `ids`.
    pub fn connections_touching(&self, ids: &HashSet<&str>) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|conn| ids.contains(conn.from.as_str()) || ids.contains(conn.to.as_str()))
            .collect()
    }

    /// Ids of items whose box intersects `rect`.
    pub fn items_in_rect(&self, rect: Rect) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| item.bounds().intersect(rect).area() > 0.0)
            .map(|item| item.id.clone())
            .collect()
    }

    /// The topmost item containing `point`.
    pub fn topmost_item_at(&self, point: Point) -> Option<&Item> {
        self.items.iter().rev().find(|item| item.bounds().contains(point))
    }
}
