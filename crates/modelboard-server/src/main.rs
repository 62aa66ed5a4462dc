//! Modelboard WebSocket Relay Server
//!
//! Relays Loro updates between clients editing the same board. Each board is
//! a room; the room keeps a merged document so late joiners receive the full
//! state on join.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "board-id" }
//! { "type": "sync", "data": "<base64-encoded-loro-bytes>" }
//! { "type": "leave" }
//! ```

mod room;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use modelboard_core::sync::{ClientMessage, ServerMessage};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use room::{AppState, RoomMessage, SyncRejected};

const DEFAULT_ADDR: &str = "0.0.0.0:3030";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelboard_server=info,tower_http=info".into()),
        )
        .init();

    let addr: SocketAddr = std::env::var("MODELBOARD_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let state = Arc::new(AppState::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Modelboard relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// Index page
async fn index() -> &'static str {
    "Modelboard Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type Sender = SplitSink<WebSocket, Message>;

/// Serialize and send one message. Returns false once the socket is gone.
async fn send(sender: &mut Sender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            true
        }
    }
}

/// Per-connection state
struct Peer {
    id: String,
    room: Option<String>,
    rx: Option<broadcast::Receiver<RoomMessage>>,
}

impl Peer {
    fn leave(&mut self, state: &AppState) {
        if let Some(room) = self.room.take() {
            state.leave_room(&room, &self.id);
            state.broadcast(&room, &self.id, ServerMessage::PeerLeft { peer_id: self.id.clone() });
            info!("Peer {} left room {}", self.id, room);
        }
        self.rx = None;
    }
}

/// Handle a client message. Returns false once the socket is gone.
async fn handle_client_message(msg: ClientMessage, peer: &mut Peer, state: &AppState, sender: &mut Sender) -> bool {
    match msg {
        ClientMessage::Join { room } => {
            peer.leave(state);
            let joined = state.join_room(&room, &peer.id);
            peer.rx = Some(joined.rx);
            peer.room = Some(room.clone());

            let reply = ServerMessage::Joined {
                room: room.clone(),
                peer_count: joined.peer_count,
                initial_sync: joined.initial_sync,
            };
            if !send(sender, &reply).await {
                return false;
            }
            state.broadcast(&room, &peer.id, ServerMessage::PeerJoined { peer_id: peer.id.clone() });
            info!("Peer {} joined room {}", peer.id, room);
            true
        }
        ClientMessage::Leave => {
            peer.leave(state);
            true
        }
        ClientMessage::Sync { data } => {
            let room = peer.room.clone().unwrap_or_default();
            match state.sync(&room, &peer.id, data) {
                Ok(()) => true,
                Err(SyncRejected::NotInRoom) => {
                    let err = ServerMessage::Error {
                        message: "Join a room before syncing".to_string(),
                    };
                    send(sender, &err).await
                }
                Err(SyncRejected::InvalidPayload(reason)) => {
                    warn!("Invalid sync payload from {}: {}", peer.id, reason);
                    let err = ServerMessage::Error {
                        message: format!("Invalid sync payload: {}", reason),
                    };
                    send(sender, &err).await
                }
            }
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut peer = Peer {
        id: Uuid::new_v4().to_string(),
        room: None,
        rx: None,
    };
    info!("New connection: {}", peer.id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if !handle_client_message(client_msg, &mut peer, &state, &mut sender).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Invalid message from {}: {}", peer.id, e);
                                let err = ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                };
                                if !send(&mut sender, &err).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore binary and ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer.id, e);
                        break;
                    }
                }
            }

            msg = async {
                match &mut peer.rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match msg {
                    Ok((from, server_msg)) => {
                        // Don't echo back to sender
                        if from != peer.id && !send(&mut sender, &server_msg).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Peer {} lagged behind by {} messages, resending room state", peer.id, skipped);
                        if let Some(msg) = peer.room.as_deref().and_then(|room| state.resync(room)) {
                            if !send(&mut sender, &msg).await {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => peer.rx = None,
                }
            }
        }
    }

    peer.leave(&state);
    info!("Connection closed: {}", peer.id);
}
