//! Board-level scalar state.

use serde::{Deserialize, Serialize};

/// Which notation a board uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardKind {
    #[default]
    Eventstorming,
    #[serde(rename = "UML")]
    Uml,
}

impl BoardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BoardKind::Eventstorming => "Eventstorming",
            BoardKind::Uml => "UML",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "eventstorming" | "event-storming" => Some(BoardKind::Eventstorming),
            "uml" => Some(BoardKind::Uml),
            _ => None,
        }
    }
}
