//! Per-board session.
//!
//! A [`BoardSession`] is created when a board is opened and dropped when it
//! is closed. It owns the replicated document and the selection controller,
//! bridges them to the relay, and talks to the persistence collaborator.

use kurbo::Point;

use crate::config::EngineConfig;
use crate::crdt::{BoardDocument, VersionVector};
use crate::error::BoardResult;
use crate::model::{ConnectionKind, ItemId, NewItem};
use crate::projection::Projection;
use crate::resolver;
use crate::seed::{BoardSnapshot, SeedOutcome};
use crate::selection::{Frame, Modifiers, SelectionController, TransformInput};
use crate::storage::{BoardStore, SavedBoard, StorageError};
use crate::sync::{ClientMessage, SyncEvent, SyncTransport, TransportSignal, encode_payload};

/// What a session reports to its host after handling transport events.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Transport(TransportSignal),
    /// The first sync left the document empty; seed it from storage.
    SeedRequested,
    /// Remote changes were merged into the document.
    RemoteChange,
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    Error { message: String },
}

pub struct BoardSession {
    board_id: String,
    config: EngineConfig,
    document: BoardDocument,
    controller: SelectionController,
    /// Last transport signal, `None` until a transport reports in.
    signal: Option<TransportSignal>,
    in_room: bool,
    first_sync_done: bool,
    seed_pending: bool,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
    /// Version already handed to the relay.
    last_sent: VersionVector,
}

impl BoardSession {
    pub fn new(board_id: impl Into<String>, config: EngineConfig) -> Self {
        let document = BoardDocument::with_config(&config);
        let controller = SelectionController::new(config.clone());
        Self {
            board_id: board_id.into(),
            config,
            document,
            controller,
            signal: None,
            in_room: false,
            first_sync_done: false,
            seed_pending: false,
            outgoing: Vec::new(),
            last_sent: VersionVector::default(),
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn document(&self) -> &BoardDocument {
        &self.document
    }

    /// Mutation API access.
    pub fn document_mut(&mut self) -> &mut BoardDocument {
        &mut self.document
    }

    pub fn projection(&self) -> &Projection {
        self.document.projection()
    }

    pub fn controller(&self) -> &SelectionController {
        &self.controller
    }

    pub fn signal(&self) -> Option<TransportSignal> {
        self.signal
    }

    pub fn is_in_room(&self) -> bool {
        self.in_room
    }

    /// Whether the document has reached the relay's merge at least once.
    pub fn is_synced(&self) -> bool {
        self.first_sync_done
    }

    // --- Room/Connection Management ---

    /// Queue a join for this board's room.
    pub fn join(&mut self) {
        self.queue(&ClientMessage::Join {
            room: self.board_id.clone(),
        });
    }

    /// Queue a leave if currently in the room.
    pub fn leave(&mut self) {
        if self.in_room {
            self.queue(&ClientMessage::Leave);
            self.in_room = false;
        }
    }

    fn queue(&mut self, msg: &ClientMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::warn!("Failed to encode client message: {}", e),
        }
    }

    /// Queue local changes the relay has not seen yet.
    fn queue_local_updates(&mut self) -> BoardResult<()> {
        if !self.in_room {
            return Ok(());
        }
        let version = self.document.version();
        if version == self.last_sent {
            return Ok(());
        }
        let bytes = self.document.export_updates(&self.last_sent)?;
        self.queue(&ClientMessage::Sync {
            data: encode_payload(&bytes),
        });
        self.last_sent = version;
        Ok(())
    }

    /// Drain pending outgoing messages, including unsent local changes.
    pub fn take_outgoing(&mut self) -> BoardResult<Vec<String>> {
        self.queue_local_updates()?;
        Ok(std::mem::take(&mut self.outgoing))
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty() || (self.in_room && self.document.version() != self.last_sent)
    }

    // --- Incoming Event Handling ---

    /// Apply one transport event to the session.
    pub fn handle_event(&mut self, event: SyncEvent) -> BoardResult<Vec<SessionEvent>> {
        let events = match event {
            SyncEvent::Connected => {
                self.signal = Some(TransportSignal::Connected);
                self.join();
                vec![SessionEvent::Transport(TransportSignal::Connected)]
            }
            SyncEvent::Disconnected => {
                self.signal = Some(TransportSignal::Disconnected);
                self.in_room = false;
                vec![SessionEvent::Transport(TransportSignal::Disconnected)]
            }
            SyncEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync,
            } => self.joined(&room, peer_count, initial_sync)?,
            SyncEvent::SyncReceived { from, data } => {
                self.queue_local_updates()?;
                match self.document.import(&data) {
                    Ok(()) => {
                        self.last_sent = self.document.version();
                        self.controller.prune(self.document.projection());
                        vec![SessionEvent::RemoteChange]
                    }
                    Err(e) => {
                        log::warn!("Failed to import sync data from {}: {}", from, e);
                        vec![SessionEvent::Error { message: e.to_string() }]
                    }
                }
            }
            SyncEvent::PeerJoined { peer_id } => vec![SessionEvent::PeerJoined { peer_id }],
            SyncEvent::PeerLeft { peer_id } => vec![SessionEvent::PeerLeft { peer_id }],
            SyncEvent::Error { message } => {
                log::warn!("Relay error: {}", message);
                vec![SessionEvent::Error { message }]
            }
        };
        Ok(events)
    }

    fn joined(&mut self, room: &str, peer_count: usize, initial_sync: Option<Vec<u8>>) -> BoardResult<Vec<SessionEvent>> {
        log::debug!("Joined room {} with {} peers", room, peer_count);
        let mut events = Vec::new();
        if let Some(bytes) = initial_sync {
            if let Err(e) = self.document.import(&bytes) {
                log::warn!("Failed to import room state: {}", e);
                return Ok(vec![SessionEvent::Error { message: e.to_string() }]);
            }
            self.controller.prune(self.document.projection());
        }

        // Offline edits the room may lack.
        self.in_room = true;
        self.last_sent = VersionVector::default();
        if !self.document.projection().is_empty() {
            self.queue_local_updates()?;
        }
        self.last_sent = self.document.version();

        self.signal = Some(TransportSignal::Synced);
        events.push(SessionEvent::Transport(TransportSignal::Synced));
        if !self.first_sync_done {
            self.first_sync_done = true;
            if self.document.projection().is_empty() {
                self.seed_pending = true;
                events.push(SessionEvent::SeedRequested);
            }
        }
        Ok(events)
    }

    /// Handle everything the transport has delivered and flush outgoing
    /// messages while it is connected.
    pub fn pump(&mut self, transport: &mut impl SyncTransport) -> BoardResult<Vec<SessionEvent>> {
        let mut events = Vec::new();
        for event in transport.poll_events() {
            events.extend(self.handle_event(event)?);
        }
        if transport.is_connected() {
            let mut pending = self.take_outgoing()?.into_iter();
            for msg in pending.by_ref() {
                if let Err(e) = transport.send(&msg) {
                    log::warn!("Failed to send to relay: {}", e);
                    self.outgoing.push(msg);
                    break;
                }
            }
            self.outgoing.extend(pending);
        }
        Ok(events)
    }

    // --- Seeding and saving ---

    /// Whether seeding is allowed now: after the first sync of an empty
    /// document, or in a session that never had a transport.
    pub fn can_seed(&self) -> bool {
        self.document.projection().is_empty() && (self.seed_pending || self.signal.is_none())
    }

    pub fn seed_from_json(&mut self, json: &str) -> BoardResult<SeedOutcome> {
        if !self.can_seed() {
            return Ok(SeedOutcome::Skipped);
        }
        let outcome = self.document.seed_from_json(json, &self.config)?;
        if matches!(outcome, SeedOutcome::Seeded { .. }) {
            self.seed_pending = false;
        }
        Ok(outcome)
    }

    /// Seed from the persistence collaborator. A board the store does not
    /// know is left empty.
    pub async fn seed_from_store(&mut self, store: &dyn BoardStore) -> BoardResult<SeedOutcome> {
        if !self.can_seed() {
            return Ok(SeedOutcome::Skipped);
        }
        match store.load(&self.board_id).await {
            Ok(json) => self.seed_from_json(&json),
            Err(StorageError::NotFound(_)) => {
                log::debug!("No stored snapshot for board {}", self.board_id);
                Ok(SeedOutcome::Skipped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot of the current board for an explicit save.
    pub fn snapshot_for_save(&self, preview: Option<Vec<u8>>) -> SavedBoard {
        SavedBoard {
            snapshot: BoardSnapshot::from_projection(self.document.projection(), Some(self.board_id.clone())),
            preview,
        }
    }

    pub async fn save_to(&self, store: &dyn BoardStore, preview: Option<Vec<u8>>) -> BoardResult<()> {
        let board = self.snapshot_for_save(preview);
        store.save(&self.board_id, &board).await?;
        log::debug!("Saved board {}", self.board_id);
        Ok(())
    }

    // --- Editing ---

    /// Create an item, parenting it to whatever host or container it lands in.
    pub fn create_item(&mut self, mut new_item: NewItem) -> BoardResult<ItemId> {
        resolver::assign_parent(self.document.projection().items(), &mut new_item, &self.config);
        self.document.add_item(new_item)
    }

    pub fn pointer_down(&mut self, point: Point, modifiers: Modifiers) -> BoardResult<Frame> {
        self.controller.pointer_down(&mut self.document, point, modifiers)
    }

    pub fn pointer_move(&mut self, point: Point) -> Frame {
        self.controller.pointer_move(&self.document, point)
    }

    pub fn pointer_up(&mut self, point: Point) -> BoardResult<Frame> {
        self.controller.pointer_up(&mut self.document, point)
    }

    pub fn escape(&mut self) -> Frame {
        self.controller.escape()
    }

    pub fn begin_connecting(&mut self, kind: ConnectionKind) {
        self.controller.begin_connecting(kind);
    }

    pub fn begin_transform(&mut self, id: &str) -> bool {
        self.controller.begin_transform(&self.document, id)
    }

    pub fn commit_transform(&mut self, input: TransformInput) -> BoardResult<bool> {
        self.controller.commit_transform(&mut self.document, input)
    }

    /// Delete the current selection with everything attached to it.
    pub fn delete_selection(&mut self) -> BoardResult<bool> {
        let ids = self.controller.selection().to_vec();
        if ids.is_empty() {
            return Ok(false);
        }
        let summary = self.document.delete_items_and_attached_connections(&ids)?;
        self.controller.prune(self.document.projection());
        Ok(!summary.is_empty())
    }

    pub fn undo(&mut self) -> BoardResult<bool> {
        let undone = self.document.undo()?;
        self.controller.prune(self.document.projection());
        Ok(undone)
    }

    pub fn redo(&mut self) -> BoardResult<bool> {
        let redone = self.document.redo()?;
        self.controller.prune(self.document.projection());
        Ok(redone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemKind, MessageLinks};
    use crate::storage::{MemoryStore, block_on};
    use crate::sync::{ConnectionState, decode_payload};
    use std::cell::RefCell;

    const BOARD: &str = r#"{
        "boardType": "Eventstorming",
        "items": [
            {"id": 1, "type": "ContextBox", "instanceName": "Ordering", "x": 0, "y": 0, "width": 800, "height": 400},
            {"id": 2, "parent": 1, "type": "Command", "instanceName": "Place Order", "x": 40, "y": 40}
        ],
        "connections": []
    }"#;

    fn session(id: &str) -> BoardSession {
        BoardSession::new(id, EngineConfig::default())
    }

    /// Connect and join an empty room.
    fn join_empty(session: &mut BoardSession) -> Vec<SessionEvent> {
        session.handle_event(SyncEvent::Connected).expect("connect");
        session
            .handle_event(SyncEvent::JoinedRoom {
                room: session.board_id().to_string(),
                peer_count: 1,
                initial_sync: None,
            })
            .expect("join")
    }

    /// Forward every sync message `from` has queued to `to`.
    fn relay(from: &mut BoardSession, to: &mut BoardSession) {
        for json in from.take_outgoing().expect("Failed to take outgoing") {
            let msg: ClientMessage = serde_json::from_str(&json).expect("Failed to parse client message");
            if let ClientMessage::Sync { data } = msg {
                let data = decode_payload(&data).expect("Failed to decode payload");
                to.handle_event(SyncEvent::SyncReceived {
                    from: from.board_id().to_string(),
                    data,
                })
                .expect("Failed to handle sync");
            }
        }
    }

    fn command(x: f64) -> NewItem {
        NewItem::new(ItemKind::MessageTrigger(MessageLinks::default()), x, 0.0, 100.0, 50.0)
    }

    #[test]
    fn test_connect_queues_join() {
        let mut s = session("board-1");
        let events = s.handle_event(SyncEvent::Connected).expect("connect");
        assert_eq!(events, vec![SessionEvent::Transport(TransportSignal::Connected)]);

        let outgoing = s.take_outgoing().expect("outgoing");
        let msg: ClientMessage = serde_json::from_str(&outgoing[0]).expect("parse");
        assert_eq!(msg, ClientMessage::Join { room: "board-1".to_string() });
    }

    #[test]
    fn test_first_empty_sync_requests_seed_once() {
        let mut s = session("board-1");
        let events = join_empty(&mut s);
        assert_eq!(
            events,
            vec![SessionEvent::Transport(TransportSignal::Synced), SessionEvent::SeedRequested]
        );
        assert!(s.can_seed());

        s.handle_event(SyncEvent::Disconnected).expect("disconnect");
        let events = join_empty(&mut s);
        assert_eq!(events, vec![SessionEvent::Transport(TransportSignal::Synced)]);
    }

    #[test]
    fn test_seed_only_after_sync() {
        let mut s = session("board-1");
        s.handle_event(SyncEvent::Connected).expect("connect");
        assert!(matches!(s.seed_from_json(BOARD).expect("seed"), SeedOutcome::Skipped));

        s.handle_event(SyncEvent::JoinedRoom {
            room: "board-1".to_string(),
            peer_count: 1,
            initial_sync: None,
        })
        .expect("join");
        let outcome = s.seed_from_json(BOARD).expect("seed");
        assert!(matches!(outcome, SeedOutcome::Seeded { items: 2, connections: 0 }));
        assert!(!s.can_seed());
        assert!(!s.document().history().can_undo());
    }

    #[test]
    fn test_reconnect_never_reseeds_emptied_board() {
        let mut s = session("board-1");
        join_empty(&mut s);
        s.seed_from_json(BOARD).expect("seed");
        let ids: Vec<ItemId> = s.projection().items().iter().map(|i| i.id.clone()).collect();
        s.document_mut().delete_items_and_attached_connections(&ids).expect("delete");
        assert!(s.projection().is_empty());

        s.handle_event(SyncEvent::Disconnected).expect("disconnect");
        let events = join_empty(&mut s);
        assert!(!events.contains(&SessionEvent::SeedRequested));
        assert!(matches!(s.seed_from_json(BOARD).expect("seed"), SeedOutcome::Skipped));
    }

    #[test]
    fn test_joined_imports_room_state() {
        let mut a = session("board-1");
        join_empty(&mut a);
        a.create_item(command(0.0)).expect("create");
        let snapshot = a.document().export_snapshot().expect("export");

        let mut b = session("board-1");
        b.handle_event(SyncEvent::Connected).expect("connect");
        let events = b
            .handle_event(SyncEvent::JoinedRoom {
                room: "board-1".to_string(),
                peer_count: 2,
                initial_sync: Some(snapshot),
            })
            .expect("join");
        assert_eq!(events, vec![SessionEvent::Transport(TransportSignal::Synced)]);
        assert_eq!(b.projection().items(), a.projection().items());
    }

    #[test]
    fn test_local_changes_reach_peer() {
        let mut a = session("board-1");
        let mut b = session("board-1");
        join_empty(&mut a);
        join_empty(&mut b);

        let id = a.create_item(command(0.0)).expect("create");
        relay(&mut a, &mut b);
        assert!(b.projection().contains_item(&id));

        // Nothing new to send
        assert!(a.take_outgoing().expect("outgoing").is_empty());
    }

    #[test]
    fn test_concurrent_updates_converge() {
        let mut a = session("board-1");
        let mut b = session("board-1");
        join_empty(&mut a);
        join_empty(&mut b);
        let id = a.create_item(command(0.0)).expect("create");
        relay(&mut a, &mut b);

        let mut on_a = a.projection().item(&id).cloned().expect("item");
        on_a.x = 10.0;
        a.document_mut().update_item(&on_a).expect("update");
        let mut on_b = b.projection().item(&id).cloned().expect("item");
        on_b.x = 20.0;
        b.document_mut().update_item(&on_b).expect("update");

        relay(&mut a, &mut b);
        relay(&mut b, &mut a);

        assert_eq!(a.projection().items().len(), 1);
        assert_eq!(a.projection().items(), b.projection().items());
        let merged = a.projection().item(&id).expect("item");
        assert!((merged.x - 10.0).abs() < 0.001 || (merged.x - 20.0).abs() < 0.001);
    }

    #[test]
    fn test_remote_delete_prunes_selection() {
        let mut a = session("board-1");
        let mut b = session("board-1");
        join_empty(&mut a);
        join_empty(&mut b);
        let id = a.create_item(command(0.0)).expect("create");
        relay(&mut a, &mut b);

        b.pointer_down(Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        b.pointer_up(Point::new(10.0, 10.0)).expect("up");
        assert_eq!(b.controller().selection(), &[id.clone()]);

        a.document_mut().delete_items_and_attached_connections(&[id]).expect("delete");
        relay(&mut a, &mut b);
        assert!(b.controller().selection().is_empty());
    }

    #[test]
    fn test_remote_changes_are_not_undoable() {
        let mut a = session("board-1");
        let mut b = session("board-1");
        join_empty(&mut a);
        join_empty(&mut b);
        a.create_item(command(0.0)).expect("create");
        relay(&mut a, &mut b);

        assert!(!b.undo().expect("undo"));
        assert_eq!(b.projection().items().len(), 1);
    }

    #[test]
    fn test_create_item_in_container() {
        let mut s = session("board-1");
        let x = s
            .create_item(NewItem::new(ItemKind::ContextContainer, 0.0, 0.0, 400.0, 300.0))
            .expect("create");
        let y = s
            .create_item(NewItem::new(ItemKind::MessageTrigger(MessageLinks::default()), 50.0, 50.0, 100.0, 50.0))
            .expect("create");
        assert_eq!(s.projection().item(&y).and_then(|i| i.parent.clone()), Some(x.clone()));
        assert_eq!(s.projection().item(&x).map(|i| i.children.clone()), Some(vec![y]));
    }

    #[test]
    fn test_delete_selection() {
        let mut s = session("board-1");
        s.create_item(command(0.0)).expect("create");
        assert!(!s.delete_selection().expect("delete"));

        s.pointer_down(Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        assert!(s.delete_selection().expect("delete"));
        assert!(s.projection().is_empty());
        assert!(s.controller().selection().is_empty());
    }

    #[test]
    fn test_seed_and_save_through_store() {
        let store = MemoryStore::new();
        store.insert_json("board-1", BOARD).expect("Failed to insert");

        let mut s = session("board-1");
        join_empty(&mut s);
        let outcome = block_on(s.seed_from_store(&store)).expect("seed");
        assert!(matches!(outcome, SeedOutcome::Seeded { items: 2, .. }));

        block_on(s.save_to(&store, Some(vec![1, 2, 3]))).expect("save");
        let json = block_on(store.load("board-1")).expect("load");
        let saved = BoardSnapshot::from_json(&json).expect("parse");
        assert_eq!(saved.items.len(), 2);
        assert_eq!(block_on(store.load_preview("board-1")).expect("preview"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_seed_from_store_unknown_board() {
        let store = MemoryStore::new();
        let mut s = session("missing");
        join_empty(&mut s);
        let outcome = block_on(s.seed_from_store(&store)).expect("seed");
        assert!(matches!(outcome, SeedOutcome::Skipped));
        assert!(s.projection().is_empty());
    }

    #[test]
    fn test_malformed_seed_is_recoverable() {
        let mut s = session("board-1");
        join_empty(&mut s);
        let outcome = s.seed_from_json("{ not json").expect("seed");
        assert!(matches!(outcome, SeedOutcome::Failed(_)));
        assert!(s.projection().is_empty());
        assert!(s.can_seed());
    }

    struct FakeTransport {
        events: Vec<SyncEvent>,
        sent: RefCell<Vec<String>>,
    }

    impl SyncTransport for FakeTransport {
        fn send(&self, msg: &str) -> Result<(), String> {
            self.sent.borrow_mut().push(msg.to_string());
            Ok(())
        }

        fn poll_events(&mut self) -> Vec<SyncEvent> {
            std::mem::take(&mut self.events)
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
    }

    #[test]
    fn test_pump_handles_events_and_flushes() {
        let mut s = session("board-1");
        let mut transport = FakeTransport {
            events: vec![
                SyncEvent::Connected,
                SyncEvent::JoinedRoom {
                    room: "board-1".to_string(),
                    peer_count: 1,
                    initial_sync: None,
                },
            ],
            sent: RefCell::new(Vec::new()),
        };
        let events = s.pump(&mut transport).expect("pump");
        assert!(events.contains(&SessionEvent::SeedRequested));
        assert_eq!(transport.sent.borrow().len(), 1);

        s.create_item(command(0.0)).expect("create");
        assert!(s.has_outgoing());
        s.pump(&mut transport).expect("pump");
        let sent = transport.sent.borrow();
        assert_eq!(sent.len(), 2);
        let msg: ClientMessage = serde_json::from_str(&sent[1]).expect("parse");
        assert!(matches!(msg, ClientMessage::Sync { .. }));
        assert!(!s.has_outgoing());
    }
}
