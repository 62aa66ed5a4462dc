//! Directed, typed edges between items.

use kurbo::Point;
use serde::{Deserialize, Serialize};

use super::ItemId;

/// Unique identifier for a connection within a board.
pub type ConnectionId = String;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Association,
    Aggregation,
    Composition,
    Generalization,
    Dependency,
    #[default]
    Plain,
}

impl ConnectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionKind::Association => "association",
            ConnectionKind::Aggregation => "aggregation",
            ConnectionKind::Composition => "composition",
            ConnectionKind::Generalization => "generalization",
            ConnectionKind::Dependency => "dependency",
            ConnectionKind::Plain => "plain",
        }
    }

    /// Parse a stored or snapshot name. Event storming `Flow` edges are plain.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "association" => Some(ConnectionKind::Association),
            "aggregation" => Some(ConnectionKind::Aggregation),
            "composition" => Some(ConnectionKind::Composition),
            "generalization" | "inheritance" => Some(ConnectionKind::Generalization),
            "dependency" => Some(ConnectionKind::Dependency),
            "plain" | "flow" => Some(ConnectionKind::Plain),
            _ => None,
        }
    }
}

/// A connection between two items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: ItemId,
    pub to: ItemId,
    pub kind: ConnectionKind,
    /// Manually edited polyline. `None` means default routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_multiplicity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_multiplicity: Option<String>,
}

impl Connection {
    /// Whether either endpoint is `id`.
    pub fn touches(&self, id: &str) -> bool {
        self.from == id || self.to == id
    }

    pub fn has_manual_points(&self) -> bool {
        self.points.as_ref().is_some_and(|p| p.len() >= 2)
    }
}

/// Input for [`crate::crdt::BoardDocument::add_connection`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewConnection {
    pub from: ItemId,
    pub to: ItemId,
    pub kind: ConnectionKind,
    pub points: Option<Vec<Point>>,
    pub from_multiplicity: Option<String>,
    pub to_multiplicity: Option<String>,
}

impl NewConnection {
    pub fn new(from: impl Into<ItemId>, to: impl Into<ItemId>, kind: ConnectionKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            points: None,
            from_multiplicity: None,
            to_multiplicity: None,
        }
    }

    pub fn with_multiplicity(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_multiplicity = Some(from.into());
        self.to_multiplicity = Some(to.into());
        self
    }

    pub(crate) fn into_connection(self, id: ConnectionId) -> Connection {
        Connection {
            id,
            from: self.from,
            to: self.to,
            kind: self.kind,
            points: self.points,
            from_multiplicity: self.from_multiplicity,
            to_multiplicity: self.to_multiplicity,
        }
    }
}
