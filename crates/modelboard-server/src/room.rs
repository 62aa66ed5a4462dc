//! Rooms: one per board, holding the connected peers and the merged
//! document so late joiners start from the full state.

use std::collections::HashSet;

use dashmap::DashMap;
use loro::{ExportMode, LoroDoc};
use modelboard_core::sync::{ServerMessage, decode_payload, encode_payload};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

/// Sender name on catch-up snapshots built from the room document.
pub const RELAY_PEER: &str = "relay";

/// Broadcast envelope: sending peer and message.
pub type RoomMessage = (String, ServerMessage);

/// Why a sync payload was not relayed.
#[derive(Debug, PartialEq, Eq)]
pub enum SyncRejected {
    NotInRoom,
    InvalidPayload(String),
}

/// Room state
pub struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<RoomMessage>,
    /// Connected peer IDs
    peers: HashSet<String>,
    /// Merge of every update relayed through the room
    doc: LoroDoc,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: HashSet::new(),
            doc: LoroDoc::new(),
        }
    }

    fn has_history(&self) -> bool {
        !self.doc.oplog_vv().is_empty()
    }

    /// Snapshot for a new joiner, if anything has been relayed yet.
    fn initial_sync(&self) -> Option<String> {
        if !self.has_history() {
            return None;
        }
        self.doc.export(ExportMode::Snapshot).ok().map(|bytes| encode_payload(&bytes))
    }
}

/// What a peer receives when it joins a room.
pub struct Joined {
    pub rx: broadcast::Receiver<RoomMessage>,
    pub initial_sync: Option<String>,
    pub peer_count: usize,
}

/// Shared application state
#[derive(Default)]
pub struct AppState {
    /// Active rooms
    rooms: DashMap<String, Room>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Add peer to room, creating the room if needed
    pub fn join_room(&self, room_id: &str, peer_id: &str) -> Joined {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.peers.insert(peer_id.to_string());
        Joined {
            rx: room.tx.subscribe(),
            initial_sync: room.initial_sync(),
            peer_count: room.peers.len(),
        }
    }

    /// Remove peer from room. Empty rooms are dropped with their history.
    pub fn leave_room(&self, room_id: &str, peer_id: &str) {
        let empty = match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                room.peers.remove(peer_id);
                room.peers.is_empty()
            }
            None => false,
        };
        if empty {
            self.rooms.remove_if(room_id, |_, room| room.peers.is_empty());
            debug!("Dropped empty room {} ({} open)", room_id, self.room_count());
        }
    }

    /// Merge a peer's update into the room and relay it to the others.
    pub fn sync(&self, room_id: &str, peer_id: &str, data: String) -> Result<(), SyncRejected> {
        let room = self.rooms.get(room_id).ok_or(SyncRejected::NotInRoom)?;
        let bytes = decode_payload(&data).ok_or_else(|| SyncRejected::InvalidPayload("not base64".to_string()))?;
        room.doc
            .import(&bytes)
            .map_err(|e| SyncRejected::InvalidPayload(e.to_string()))?;
        let _ = room.tx.send((
            peer_id.to_string(),
            ServerMessage::Sync {
                from: peer_id.to_string(),
                data,
            },
        ));
        Ok(())
    }

    /// The whole room state as one sync message, for a peer that fell
    /// behind the broadcast channel.
    pub fn resync(&self, room_id: &str) -> Option<ServerMessage> {
        let data = self.rooms.get(room_id)?.initial_sync()?;
        Some(ServerMessage::Sync {
            from: RELAY_PEER.to_string(),
            data,
        })
    }

    /// Broadcast message to room
    pub fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), msg));
        }
    }
}
