//! Diagram items.

use std::collections::BTreeMap;

use kurbo::{Point, Rect};
use serde::{Deserialize, Deserializer, Serialize};

/// Unique identifier for an item within a board.
pub type ItemId = String;

/// Discriminant of [`ItemKind`], used wherever only the kind matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemTag {
    MessageTrigger,
    MessageResult,
    Policy,
    StateHolder,
    Actor,
    ReadModel,
    ContextContainer,
    Class,
    Interface,
    Enum,
    Component,
    Package,
}

impl ItemTag {
    pub const ALL: [ItemTag; 12] = [
        ItemTag::MessageTrigger,
        ItemTag::MessageResult,
        ItemTag::Policy,
        ItemTag::StateHolder,
        ItemTag::Actor,
        ItemTag::ReadModel,
        ItemTag::ContextContainer,
        ItemTag::Class,
        ItemTag::Interface,
        ItemTag::Enum,
        ItemTag::Component,
        ItemTag::Package,
    ];

    /// Canonical name stored in the replicated document.
    pub fn as_str(self) -> &'static str {
        match self {
            ItemTag::MessageTrigger => "message-trigger",
            ItemTag::MessageResult => "message-result",
            ItemTag::Policy => "policy",
            ItemTag::StateHolder => "state-holder",
            ItemTag::Actor => "actor",
            ItemTag::ReadModel => "read-model",
            ItemTag::ContextContainer => "context-container",
            ItemTag::Class => "class",
            ItemTag::Interface => "interface",
            ItemTag::Enum => "enum",
            ItemTag::Component => "component",
            ItemTag::Package => "package",
        }
    }

    /// Name used in board snapshots.
    pub fn board_name(self) -> &'static str {
        match self {
            ItemTag::MessageTrigger => "Command",
            ItemTag::MessageResult => "Event",
            ItemTag::Policy => "Policy",
            ItemTag::StateHolder => "Aggregate",
            ItemTag::Actor => "Actor",
            ItemTag::ReadModel => "ReadModel",
            ItemTag::ContextContainer => "ContextBox",
            ItemTag::Class => "Class",
            ItemTag::Interface => "Interface",
            ItemTag::Enum => "Enum",
            ItemTag::Component => "Component",
            ItemTag::Package => "Package",
        }
    }

    /// Parse either the canonical or the snapshot name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == name || tag.board_name() == name)
    }

    /// Whether items of this kind enclose other items.
    pub fn is_container(self) -> bool {
        matches!(self, ItemTag::ContextContainer | ItemTag::Package)
    }

    /// Host kinds a sticky item may attach to. Empty for non-sticky kinds.
    pub fn attachment_hosts(self) -> &'static [ItemTag] {
        match self {
            ItemTag::Actor | ItemTag::ReadModel => &[ItemTag::MessageTrigger],
            ItemTag::Policy => &[ItemTag::MessageResult],
            _ => &[],
        }
    }

    pub fn is_sticky(self) -> bool {
        !self.attachment_hosts().is_empty()
    }

    /// Whether connections may start or end on this kind.
    pub fn is_connectable(self) -> bool {
        !matches!(self, ItemTag::ContextContainer)
    }
}

/// Outgoing references of command/event items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageLinks {
    /// The single item this message produces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produces: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connected_policies: Vec<ItemId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
    Protected,
    Package,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
            Visibility::Package => "package",
        }
    }

    /// Accepts both words and UML symbols (`+`, `-`, `#`, `~`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "public" | "+" => Some(Visibility::Public),
            "private" | "-" => Some(Visibility::Private),
            "protected" | "#" => Some(Visibility::Protected),
            "package" | "~" => Some(Visibility::Package),
            _ => None,
        }
    }
}

// Generated boards spell visibility freely ("Private", "-"); unknown values read as public.
impl<'de> Deserialize<'de> for Visibility {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Visibility::parse(&name).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(rename = "returnType", default)]
    pub return_type: String,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Body of class-like items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stereotype: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumBody {
    #[serde(default)]
    pub literals: Vec<String>,
}

/// The kind of an item together with its kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ItemKind {
    MessageTrigger(MessageLinks),
    MessageResult(MessageLinks),
    Policy,
    StateHolder,
    Actor,
    ReadModel,
    ContextContainer,
    Class(ClassBody),
    Interface(ClassBody),
    Enum(EnumBody),
    Component,
    Package,
}

impl ItemKind {
    /// A kind with an empty payload.
    pub fn empty(tag: ItemTag) -> Self {
        match tag {
            ItemTag::MessageTrigger => ItemKind::MessageTrigger(MessageLinks::default()),
            ItemTag::MessageResult => ItemKind::MessageResult(MessageLinks::default()),
            ItemTag::Policy => ItemKind::Policy,
            ItemTag::StateHolder => ItemKind::StateHolder,
            ItemTag::Actor => ItemKind::Actor,
            ItemTag::ReadModel => ItemKind::ReadModel,
            ItemTag::ContextContainer => ItemKind::ContextContainer,
            ItemTag::Class => ItemKind::Class(ClassBody::default()),
            ItemTag::Interface => ItemKind::Interface(ClassBody::default()),
            ItemTag::Enum => ItemKind::Enum(EnumBody::default()),
            ItemTag::Component => ItemKind::Component,
            ItemTag::Package => ItemKind::Package,
        }
    }

    pub fn tag(&self) -> ItemTag {
        match self {
            ItemKind::MessageTrigger(_) => ItemTag::MessageTrigger,
            ItemKind::MessageResult(_) => ItemTag::MessageResult,
            ItemKind::Policy => ItemTag::Policy,
            ItemKind::StateHolder => ItemTag::StateHolder,
            ItemKind::Actor => ItemTag::Actor,
            ItemKind::ReadModel => ItemTag::ReadModel,
            ItemKind::ContextContainer => ItemTag::ContextContainer,
            ItemKind::Class(_) => ItemTag::Class,
            ItemKind::Interface(_) => ItemTag::Interface,
            ItemKind::Enum(_) => ItemTag::Enum,
            ItemKind::Component => ItemTag::Component,
            ItemKind::Package => ItemTag::Package,
        }
    }

    pub fn message_links(&self) -> Option<&MessageLinks> {
        match self {
            ItemKind::MessageTrigger(links) | ItemKind::MessageResult(links) => Some(links),
            _ => None,
        }
    }

    pub fn class_body(&self) -> Option<&ClassBody> {
        match self {
            ItemKind::Class(body) | ItemKind::Interface(body) => Some(body),
            _ => None,
        }
    }

    /// Ids of other items referenced by the payload.
    pub fn references(&self) -> Vec<&ItemId> {
        match self.message_links() {
            Some(links) => links.produces.iter().chain(links.connected_policies.iter()).collect(),
            None => Vec::new(),
        }
    }

    /// Drop payload references for which `keep` returns false.
    /// Returns true if anything was removed.
    pub fn retain_references(&mut self, keep: impl Fn(&str) -> bool) -> bool {
        let links = match self {
            ItemKind::MessageTrigger(links) | ItemKind::MessageResult(links) => links,
            _ => return false,
        };
        let before = links.connected_policies.len();
        links.connected_policies.retain(|id| keep(id));
        let mut changed = links.connected_policies.len() != before;
        if links.produces.as_deref().is_some_and(|id| !keep(id)) {
            links.produces = None;
            changed = true;
        }
        changed
    }
}

/// One diagram element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(flatten)]
    pub kind: ItemKind,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Rotation in degrees around the item's center.
    #[serde(default)]
    pub rotation: f64,
    /// Enclosing container or attachment host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ItemId>,
    /// Cached ids of items whose `parent` is this item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ItemId>,
    /// Free-form key/value payload (description, linked diagram, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Item {
    pub fn tag(&self) -> ItemTag {
        self.kind.tag()
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    pub fn center(&self) -> Point {
        self.bounds().center()
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Copy of this item moved by (dx, dy).
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        let mut moved = self.clone();
        moved.x += dx;
        moved.y += dy;
        moved
    }
}

/// Input for [`crate::crdt::BoardDocument::add_item`]. The id is assigned on insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub kind: ItemKind,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub parent: Option<ItemId>,
    pub fields: BTreeMap<String, String>,
}

impl NewItem {
    pub fn new(kind: ItemKind, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            kind,
            label: String::new(),
            x,
            y,
            width,
            height,
            rotation: 0.0,
            parent: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub(crate) fn into_item(self, id: ItemId) -> Item {
        Item {
            id,
            kind: self.kind,
            label: self.label,
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            rotation: self.rotation,
            parent: self.parent,
            children: Vec::new(),
            fields: self.fields,
        }
    }
}
