//! Relay protocol and WebSocket transport.
//!
//! Clients exchange base64-encoded Loro updates through a relay server that
//! groups peers into rooms, one room per board.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the room of a board
    Join { room: String },
    /// Leave current room
    Leave,
    /// Sync CRDT data (base64 encoded Loro bytes)
    Sync { data: String },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with the merged room state
    Joined {
        room: String,
        peer_count: usize,
        /// Snapshot of the room document (if the room has history)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_sync: Option<String>,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    /// Sync data from another peer
    Sync { from: String, data: String },
    Error { message: String },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Lifecycle of the replication transport as seen by a board session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    /// The socket is open; the room has not been joined yet.
    Connected,
    /// The room state has been imported into the local document.
    Synced,
    Disconnected,
}

/// Events from the WebSocket client
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    JoinedRoom {
        room: String,
        peer_count: usize,
        initial_sync: Option<Vec<u8>>,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    /// Received sync data from a peer
    SyncReceived { from: String, data: Vec<u8> },
    Error { message: String },
}

impl SyncEvent {
    /// Decode a server message. Returns `None` for sync payloads that are
    /// not valid base64.
    pub fn from_server_message(msg: ServerMessage) -> Option<Self> {
        let event = match msg {
            ServerMessage::Joined {
                room,
                peer_count,
                initial_sync,
            } => {
                let initial_sync = match initial_sync {
                    Some(data) => Some(decode_payload(&data)?),
                    None => None,
                };
                SyncEvent::JoinedRoom {
                    room,
                    peer_count,
                    initial_sync,
                }
            }
            ServerMessage::PeerJoined { peer_id } => SyncEvent::PeerJoined { peer_id },
            ServerMessage::PeerLeft { peer_id } => SyncEvent::PeerLeft { peer_id },
            ServerMessage::Sync { from, data } => SyncEvent::SyncReceived {
                from,
                data: decode_payload(&data)?,
            },
            ServerMessage::Error { message } => SyncEvent::Error { message },
        };
        Some(event)
    }

    /// Parse and decode a raw server frame.
    pub fn from_json(text: &str) -> Option<Self> {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => {
                let event = Self::from_server_message(msg);
                if event.is_none() {
                    log::warn!("Dropping server message with undecodable payload");
                }
                event
            }
            Err(e) => {
                log::warn!("Failed to parse server message: {}", e);
                None
            }
        }
    }
}

/// Encode Loro bytes for the wire.
pub fn encode_payload(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode Loro bytes from the wire.
pub fn decode_payload(data: &str) -> Option<Vec<u8>> {
    STANDARD.decode(data).ok()
}

/// A message channel to the relay.
pub trait SyncTransport {
    /// Send a text frame.
    fn send(&self, msg: &str) -> Result<(), String>;

    /// Poll for pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<SyncEvent>;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

// ============================================================================
// Native WebSocket Client
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::net::TcpStream;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::stream::MaybeTlsStream;
    use tungstenite::{Message, WebSocket, connect};
    use url::Url;

    type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

    /// Requests from the owner to the relay thread.
    enum Command {
        Send(String),
        Close,
    }

    /// Outcome of one turn of the relay loop.
    #[derive(PartialEq)]
    enum Step {
        Continue,
        Stop,
    }

    /// Relay connection for native platforms.
    ///
    /// The socket lives on a background thread; frames cross over channels so
    /// `send` and `poll_events` never block the editor. The last URL is kept
    /// so a dropped connection can be reopened with [`NativeWebSocket::reconnect`].
    pub struct NativeWebSocket {
        url: Option<Url>,
        state: ConnectionState,
        commands: Option<Sender<Command>>,
        events: Option<Receiver<SyncEvent>>,
        worker: Option<JoinHandle<()>>,
    }

    /// Validate a relay URL.
    pub(crate) fn parse_relay_url(url: &str) -> Result<Url, String> {
        let parsed = Url::parse(url).map_err(|e| format!("Invalid URL: {}", e))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(format!("Invalid WebSocket URL scheme: {}", parsed.scheme()));
        }
        Ok(parsed)
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                url: None,
                state: ConnectionState::Disconnected,
                commands: None,
                events: None,
                worker: None,
            }
        }

        /// The relay this socket was last pointed at.
        pub fn url(&self) -> Option<&Url> {
            self.url.as_ref()
        }

        /// Open a connection to a relay server.
        pub fn connect(&mut self, url: &str) -> Result<(), String> {
            if self.commands.is_some() {
                return Err("Already connected".to_string());
            }
            let url = parse_relay_url(url)?;
            self.url = Some(url.clone());
            self.spawn(url)
        }

        /// Reopen the last relay URL, dropping the current connection if any.
        pub fn reconnect(&mut self) -> Result<(), String> {
            let url = self.url.clone().ok_or_else(|| "No relay URL to reconnect to".to_string())?;
            self.shutdown();
            self.spawn(url)
        }

        pub fn disconnect(&mut self) {
            self.shutdown();
            self.state = ConnectionState::Disconnected;
        }

        fn spawn(&mut self, url: Url) -> Result<(), String> {
            let (command_tx, command_rx) = channel();
            let (event_tx, event_rx) = channel();
            let worker = thread::Builder::new()
                .name("modelboard-relay".to_string())
                .spawn(move || run(url, command_rx, event_tx))
                .map_err(|e| format!("Failed to start relay thread: {}", e))?;
            self.state = ConnectionState::Connecting;
            self.commands = Some(command_tx);
            self.events = Some(event_rx);
            self.worker = Some(worker);
            Ok(())
        }

        fn shutdown(&mut self) {
            if let Some(tx) = self.commands.take() {
                let _ = tx.send(Command::Close);
            }
            self.release();
        }

        /// Forget the channels of a relay thread that has stopped.
        fn release(&mut self) {
            self.commands = None;
            self.events = None;
            self.worker = None;
        }
    }

    /// Body of the relay thread.
    fn run(url: Url, commands: Receiver<Command>, events: Sender<SyncEvent>) {
        log::info!("Connecting to relay {}", url);
        let mut socket = match connect(url.as_str()) {
            Ok((socket, response)) => {
                log::debug!("Relay handshake status {}", response.status());
                socket
            }
            Err(e) => {
                log::warn!("Relay connection failed: {}", e);
                let _ = events.send(SyncEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
                return;
            }
        };
        // Short read timeout so queued commands are not starved.
        if let MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }
        let _ = events.send(SyncEvent::Connected);

        while turn(&mut socket, &commands, &events) == Step::Continue {}

        log::info!("Relay connection to {} closed", url);
        let _ = events.send(SyncEvent::Disconnected);
    }

    /// Hand an event to the owner. Stops once the owner is gone.
    fn forward(events: &Sender<SyncEvent>, event: SyncEvent) -> Step {
        if events.send(event).is_err() {
            Step::Stop
        } else {
            Step::Continue
        }
    }

    /// Flush queued commands, then wait briefly for one incoming frame.
    fn turn(socket: &mut Socket, commands: &Receiver<Command>, events: &Sender<SyncEvent>) -> Step {
        loop {
            match commands.try_recv() {
                Ok(Command::Send(text)) => {
                    if let Err(e) = socket.send(Message::Text(text)) {
                        log::warn!("Relay send failed: {}", e);
                        return Step::Stop;
                    }
                }
                Ok(Command::Close) => {
                    let _ = socket.close(None);
                    return Step::Stop;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Step::Stop,
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => match SyncEvent::from_json(&text) {
                Some(event) => forward(events, event),
                None => Step::Continue,
            },
            Ok(Message::Close(_)) => Step::Stop,
            // Pings are answered by tungstenite on the next read.
            Ok(_) => Step::Continue,
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
            {
                Step::Continue
            }
            Err(e) => {
                log::warn!("Relay read failed: {}", e);
                Step::Stop
            }
        }
    }

    impl SyncTransport for NativeWebSocket {
        fn send(&self, msg: &str) -> Result<(), String> {
            let tx = self.commands.as_ref().ok_or_else(|| "Not connected".to_string())?;
            tx.send(Command::Send(msg.to_string()))
                .map_err(|_| "Relay thread has stopped".to_string())
        }

        fn poll_events(&mut self) -> Vec<SyncEvent> {
            let Some(rx) = self.events.as_ref() else {
                return Vec::new();
            };
            // Checked before draining so the last events of a finished thread are kept.
            let mut stopped = self.worker.as_ref().is_some_and(JoinHandle::is_finished);
            let received: Vec<SyncEvent> = rx.try_iter().collect();
            for event in &received {
                match event {
                    SyncEvent::Connected => self.state = ConnectionState::Connected,
                    SyncEvent::Disconnected => {
                        self.state = ConnectionState::Disconnected;
                        stopped = true;
                    }
                    SyncEvent::Error { .. } => self.state = ConnectionState::Error,
                    _ => {}
                }
            }
            if stopped {
                self.release();
            }
            received
        }

        fn state(&self) -> ConnectionState {
            self.state
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.shutdown();
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;
