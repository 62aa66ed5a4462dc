//! Board data model: items, connections and the board kind.

mod board;
mod connection;
mod item;

pub use board::BoardKind;
pub use connection::{Connection, ConnectionId, ConnectionKind, NewConnection};
pub use item::{
    Attribute, ClassBody, EnumBody, Item, ItemId, ItemKind, ItemTag, MessageLinks, NewItem,
    Operation, Parameter, Visibility,
};
