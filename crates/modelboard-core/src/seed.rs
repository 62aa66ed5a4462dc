//! Board snapshots: seeding an empty document and exporting for save.
//!
//! Snapshots are the JSON boards produced by generators and by explicit
//! saves. Import validates the whole snapshot before touching the document,
//! so a malformed snapshot leaves the board empty.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use kurbo::Point;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::crdt::{BoardDocument, ChangeOrigin};
use crate::error::BoardResult;
use crate::model::{
    Attribute, BoardKind, ClassBody, Connection, ConnectionKind, EnumBody, Item, ItemKind,
    ItemTag, MessageLinks, Operation,
};
use crate::projection::Projection;
use crate::resolver;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("malformed snapshot: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown board kind '{0}'")]
    UnknownBoardKind(String),
    #[error("item {id} has unknown kind '{kind}'")]
    UnknownItemKind { id: String, kind: String },
    #[error("connection {id} has unknown kind '{kind}'")]
    UnknownConnectionKind { id: String, kind: String },
    #[error("duplicate id {0}")]
    DuplicateId(String),
    #[error("{from} references missing item {to}")]
    DanglingReference { from: String, to: String },
    #[error("connection {id} cannot attach to a {tag:?}")]
    IllegalEndpoint { id: String, tag: ItemTag },
    #[error("item {id} has invalid geometry")]
    InvalidGeometry { id: String },
}

/// Snapshot ids may be numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotId {
    Number(i64),
    Text(String),
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotId::Number(n) => write!(f, "{}", n),
            SnapshotId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotItem {
    pub id: SnapshotId,
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    #[serde(alias = "instanceName", default)]
    pub label: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<SnapshotId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stereotype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(default, alias = "methods", skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub literals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produces: Option<SnapshotId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connected_policies: Vec<SnapshotId>,
    /// Everything else, e.g. `description` or `linkedDiagram`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SnapshotId>,
    pub from: SnapshotId,
    pub to: SnapshotId,
    #[serde(rename = "type", alias = "kind", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_multiplicity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_multiplicity: Option<String>,
}

/// A whole board as exchanged with generators and storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    #[serde(alias = "boardType", default, skip_serializing_if = "Option::is_none")]
    pub board_kind: Option<String>,
    #[serde(alias = "instanceName", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub items: Vec<SnapshotItem>,
    #[serde(default)]
    pub connections: Vec<SnapshotConnection>,
}

impl BoardSnapshot {
    pub fn from_json(json: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, SeedError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Snapshot of the current board, in z-order.
    pub fn from_projection(projection: &Projection, name: Option<String>) -> Self {
        let items = projection.items().iter().map(snapshot_item).collect();
        let connections = projection
            .connections()
            .iter()
            .map(|conn| SnapshotConnection {
                id: Some(SnapshotId::Text(conn.id.clone())),
                from: SnapshotId::Text(conn.from.clone()),
                to: SnapshotId::Text(conn.to.clone()),
                kind: Some(conn.kind.as_str().to_string()),
                points: conn.points.clone(),
                from_multiplicity: conn.from_multiplicity.clone(),
                to_multiplicity: conn.to_multiplicity.clone(),
            })
            .collect();
        Self {
            board_kind: Some(projection.board_kind().as_str().to_string()),
            name,
            items,
            connections,
        }
    }
}

fn snapshot_item(item: &Item) -> SnapshotItem {
    let mut snapshot = SnapshotItem {
        id: SnapshotId::Text(item.id.clone()),
        kind: item.tag().board_name().to_string(),
        label: item.label.clone(),
        x: item.x,
        y: item.y,
        width: Some(item.width),
        height: Some(item.height),
        rotation: item.rotation,
        parent: item.parent.clone().map(SnapshotId::Text),
        stereotype: None,
        attributes: Vec::new(),
        operations: Vec::new(),
        literals: Vec::new(),
        produces: None,
        connected_policies: Vec::new(),
        extra: item
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    };
    match &item.kind {
        ItemKind::MessageTrigger(links) | ItemKind::MessageResult(links) => {
            snapshot.produces = links.produces.clone().map(SnapshotId::Text);
            snapshot.connected_policies = links.connected_policies.iter().cloned().map(SnapshotId::Text).collect();
        }
        ItemKind::Class(body) | ItemKind::Interface(body) => {
            snapshot.stereotype = body.stereotype.clone();
            snapshot.attributes = body.attributes.clone();
            snapshot.operations = body.operations.clone();
        }
        ItemKind::Enum(body) => snapshot.literals = body.literals.clone(),
        _ => {}
    }
    snapshot
}

/// A validated snapshot, ready to be written in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedPlan {
    pub board_kind: BoardKind,
    pub items: Vec<Item>,
    pub connections: Vec<Connection>,
}

impl SeedPlan {
    /// Validate a snapshot and convert it to records.
    ///
    /// Snapshot ids are kept (numbers become their decimal string), so two
    /// peers seeding the same snapshot write the same records.
    pub fn from_snapshot(snapshot: &BoardSnapshot, config: &EngineConfig) -> Result<Self, SeedError> {
        let board_kind = match snapshot.board_kind.as_deref() {
            Some(name) => BoardKind::parse(name).ok_or_else(|| SeedError::UnknownBoardKind(name.to_string()))?,
            None => BoardKind::default(),
        };

        let mut tags: HashMap<String, ItemTag> = HashMap::new();
        for raw in &snapshot.items {
            let id = raw.id.to_string();
            let tag = ItemTag::parse(&raw.kind).ok_or_else(|| SeedError::UnknownItemKind {
                id: id.clone(),
                kind: raw.kind.clone(),
            })?;
            if tags.insert(id.clone(), tag).is_some() {
                return Err(SeedError::DuplicateId(id));
            }
        }
        let resolve = |from: &str, to: &SnapshotId| -> Result<String, SeedError> {
            let to = to.to_string();
            if tags.contains_key(&to) {
                Ok(to)
            } else {
                Err(SeedError::DanglingReference { from: from.to_string(), to })
            }
        };

        let mut items = Vec::with_capacity(snapshot.items.len());
        for raw in &snapshot.items {
            let id = raw.id.to_string();
            let width = raw.width.unwrap_or(config.default_item_width);
            let height = raw.height.unwrap_or(config.default_item_height);
            let finite = [raw.x, raw.y, width, height, raw.rotation].iter().all(|v| v.is_finite());
            if !finite || width <= 0.0 || height <= 0.0 {
                return Err(SeedError::InvalidGeometry { id });
            }
            let parent = raw.parent.as_ref().map(|p| resolve(&id, p)).transpose()?;
            let kind = match tags[&id] {
                ItemTag::MessageTrigger | ItemTag::MessageResult => {
                    let links = MessageLinks {
                        produces: raw.produces.as_ref().map(|p| resolve(&id, p)).transpose()?,
                        connected_policies: raw
                            .connected_policies
                            .iter()
                            .map(|p| resolve(&id, p))
                            .collect::<Result<_, _>>()?,
                    };
                    if tags[&id] == ItemTag::MessageTrigger {
                        ItemKind::MessageTrigger(links)
                    } else {
                        ItemKind::MessageResult(links)
                    }
                }
                ItemTag::Class | ItemTag::Interface => {
                    let body = ClassBody {
                        stereotype: raw.stereotype.clone().filter(|s| !s.is_empty()),
                        attributes: raw.attributes.clone(),
                        operations: raw.operations.clone(),
                    };
                    if tags[&id] == ItemTag::Class {
                        ItemKind::Class(body)
                    } else {
                        ItemKind::Interface(body)
                    }
                }
                ItemTag::Enum => ItemKind::Enum(EnumBody {
                    literals: raw.literals.clone(),
                }),
                tag => ItemKind::empty(tag),
            };
            let fields = raw
                .extra
                .iter()
                .filter_map(|(k, v)| match v {
                    Value::String(s) => Some((k.clone(), s.clone())),
                    Value::Number(n) => Some((k.clone(), n.to_string())),
                    Value::Bool(b) => Some((k.clone(), b.to_string())),
                    _ => None,
                })
                .collect();
            items.push(Item {
                id,
                kind,
                label: raw.label.clone(),
                x: raw.x,
                y: raw.y,
                width,
                height,
                rotation: raw.rotation,
                parent,
                children: Vec::new(),
                fields,
            });
        }
        for rebuilt in resolver::rebuild_children(&items) {
            if let Some(item) = items.iter_mut().find(|i| i.id == rebuilt.id) {
                *item = rebuilt;
            }
        }

        let mut connection_ids = HashSet::new();
        let mut connections = Vec::with_capacity(snapshot.connections.len());
        for raw in &snapshot.connections {
            let id = match &raw.id {
                Some(id) => id.to_string(),
                None => format!("conn-{}-{}", raw.from, raw.to),
            };
            if !connection_ids.insert(id.clone()) {
                return Err(SeedError::DuplicateId(id));
            }
            let kind = match raw.kind.as_deref() {
                Some(name) => ConnectionKind::parse(name).ok_or_else(|| SeedError::UnknownConnectionKind {
                    id: id.clone(),
                    kind: name.to_string(),
                })?,
                None => ConnectionKind::default(),
            };
            let from = resolve(&id, &raw.from)?;
            let to = resolve(&id, &raw.to)?;
            for endpoint in [&from, &to] {
                let tag = tags[endpoint];
                if !tag.is_connectable() {
                    return Err(SeedError::IllegalEndpoint { id, tag });
                }
            }
            connections.push(Connection {
                id,
                from,
                to,
                kind,
                points: raw.points.clone().filter(|p| p.len() >= 2),
                from_multiplicity: raw.from_multiplicity.clone(),
                to_multiplicity: raw.to_multiplicity.clone(),
            });
        }

        Ok(Self {
            board_kind,
            items,
            connections,
        })
    }

    pub fn from_json(json: &str, config: &EngineConfig) -> Result<Self, SeedError> {
        Self::from_snapshot(&BoardSnapshot::from_json(json)?, config)
    }
}

/// Result of an attempt to seed a board.
#[derive(Debug)]
pub enum SeedOutcome {
    Seeded { items: usize, connections: usize },
    /// The document already had content.
    Skipped,
    /// The snapshot was rejected; the board is left empty.
    Failed(SeedError),
}

impl BoardDocument {
    /// Write a validated plan into an empty document as one transaction.
    ///
    /// Seed commits are not undoable. Returns false if the document already
    /// has content.
    pub fn seed(&mut self, plan: SeedPlan) -> BoardResult<bool> {
        if !self.projection().is_empty() {
            return Ok(false);
        }
        self.apply_transaction_with_origin(ChangeOrigin::Seed, |txn| {
            txn.set_board_kind(plan.board_kind)?;
            for item in plan.items {
                txn.insert_item(item)?;
            }
            for connection in plan.connections {
                txn.insert_connection(connection)?;
            }
            Ok(true)
        })
    }

    /// Parse, validate and seed in one step.
    pub fn seed_from_json(&mut self, json: &str, config: &EngineConfig) -> BoardResult<SeedOutcome> {
        if !self.projection().is_empty() {
            return Ok(SeedOutcome::Skipped);
        }
        let plan = match SeedPlan::from_json(json, config) {
            Ok(plan) => plan,
            Err(e) => {
                log::warn!("Rejected board snapshot: {}", e);
                return Ok(SeedOutcome::Failed(e));
            }
        };
        let (items, connections) = (plan.items.len(), plan.connections.len());
        if self.seed(plan)? {
            log::debug!("Seeded {} items and {} connections", items, connections);
            Ok(SeedOutcome::Seeded { items, connections })
        } else {
            Ok(SeedOutcome::Skipped)
        }
    }
}
