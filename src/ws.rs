//! WebSocket gateway — the heart of chatd.
//!
//! Flow per connection:
//! 1. Authenticate the upgrade request (Authorization header or `?token=`)
//! 2. Rejected: accept the upgrade, then close at once with no payload
//! 3. Accepted: split the socket; a writer task drains the outbound queue
//! 4. Reader loop: only reads frames and queues text to this connection's
//!    op worker, so it always sees the close
//! 5. Op worker: decodes and runs events one at a time; replies go out in
//!    request order
//! 6. On close/error: the membership guard drops the connection from every
//!    room; queued sends still finish and still reach the room

use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Handshake;
use crate::error::ChatError;
use crate::registry::{Membership, Outbound, Peer};
use crate::state::AppState;
use crate::types::*;

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
}

/// Axum handler for GET /ws — authenticates, then upgrades.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let handshake = Handshake::from_parts(&headers, query.token);

    match state.authenticator.authenticate(handshake).await {
        Ok(identity) => ws.on_upgrade(move |socket| handle_socket(socket, state, identity)),
        Err(e) => {
            warn!("handshake rejected: {e}");
            ws.on_upgrade(|mut socket| async move {
                let _ = socket.send(Message::Close(None)).await;
            })
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════

/// An authenticated connection. Only exists once a handshake succeeded, so
/// every operation below runs with a known identity.
pub struct Session {
    pub conn_id: ConnId,
    pub identity: Identity,
    outbound: Outbound,
}

impl Session {
    pub fn open(identity: Identity, outbound: Outbound) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            identity,
            outbound,
        }
    }

    pub fn peer(&self) -> Peer {
        Peer {
            conn_id: self.conn_id,
            user_id: self.identity.id,
            outbound: self.outbound.clone(),
        }
    }

    fn encode(&self, event: &ServerEvent) -> Option<Message> {
        match serde_json::to_string(event) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                error!(conn_id = %self.conn_id, "serialize error: {e}");
                None
            }
        }
    }

    /// Queue an event for this connection only. A closed connection is
    /// not an error here.
    async fn reply(&self, event: &ServerEvent) {
        let Some(msg) = self.encode(event) else { return };
        if self.outbound.send(msg).await.is_err() {
            debug!(conn_id = %self.conn_id, "reply dropped, connection closed");
        }
    }

    async fn reply_error(&self, err: &ChatError) {
        self.reply(&exception(err)).await;
    }

    /// Like `reply_error`, but never waits on a full queue.
    fn try_reply_error(&self, err: &ChatError) {
        let Some(msg) = self.encode(&exception(err)) else { return };
        if self.outbound.try_send(msg).is_err() {
            debug!(conn_id = %self.conn_id, "reply dropped, queue full or closed");
        }
    }
}

fn exception(err: &ChatError) -> ServerEvent {
    ServerEvent::Exception(ExceptionMsg {
        kind: err.kind(),
        message: err.client_message(),
    })
}

/// Per-connection lifecycle after a successful handshake.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let (sink, mut stream) = socket.split();
    let (outbound, outbound_rx) = mpsc::channel(state.config.outbound_buffer);
    let session = Arc::new(Session::open(identity, outbound));
    let membership = Membership::new(Arc::clone(&state.registry), session.conn_id);

    tokio::spawn(write_loop(sink, outbound_rx));

    let (ops, queued) = mpsc::channel(state.config.outbound_buffer);
    tokio::spawn(op_loop(Arc::clone(&state), Arc::clone(&session), queued));

    info!(
        conn_id = %session.conn_id,
        user_id = %session.identity.id,
        nickname = %session.identity.nickname,
        "session open"
    );

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match ops.try_send(text) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(conn_id = %session.conn_id, "op queue full, event dropped");
                    session.try_reply_error(&ChatError::BadRequest(
                        "too many requests in flight".into(),
                    ));
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(conn_id = %session.conn_id, "op worker gone");
                    break;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) => { /* axum auto-pongs */ }
            Ok(_) => { /* binary frames ignored */ }
            Err(e) => {
                warn!(conn_id = %session.conn_id, "ws recv error: {e}");
                break;
            }
        }
    }

    // Leave every room now; ops already queued keep going, but any join
    // among them is refused by the registry.
    drop(membership);
    drop(ops);

    info!(conn_id = %session.conn_id, user_id = %session.identity.id, "session closed");
}

// ═══════════════════════════════════════════════════════════════
// Event handling
// ═══════════════════════════════════════════════════════════════

/// Runs this connection's events in arrival order. Outlives the reader so a
/// disconnect never cancels a send that was already accepted.
async fn op_loop(
    state: Arc<AppState>,
    session: Arc<Session>,
    mut queued: mpsc::Receiver<Utf8Bytes>,
) {
    while let Some(text) = queued.recv().await {
        handle_client_event(text.as_str(), &state, &session).await;
    }
}

async fn handle_client_event(text: &str, state: &AppState, session: &Session) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(conn_id = %session.conn_id, "undecodable event: {e}");
            session
                .reply_error(&ChatError::BadRequest(format!("invalid event: {e}")))
                .await;
            return;
        }
    };

    match event {
        ClientEvent::CreateRoom(msg) => match state.rooms.create(&msg.member_ids).await {
            Ok(room) => {
                let ack = ServerEvent::RoomCreated(RoomCreatedMsg {
                    room_id: room.id,
                    member_ids: room.member_ids,
                });
                session.reply(&ack).await;
            }
            Err(e) => {
                warn!(conn_id = %session.conn_id, "create_room failed: {e}");
                session.reply_error(&e).await;
            }
        },
        ClientEvent::JoinRooms(msg) => {
            match state.membership.join(&session.peer(), &msg.room_ids).await {
                Ok(room_ids) => {
                    session
                        .reply(&ServerEvent::RoomsJoined(RoomsJoinedMsg { room_ids }))
                        .await;
                }
                Err(e) => {
                    warn!(conn_id = %session.conn_id, "join_rooms failed: {e}");
                    session.reply_error(&e).await;
                }
            }
        }
        ClientEvent::SendMessage(msg) => {
            let result = state
                .messages
                .send(msg.room_id, &session.identity, &msg.body, session.conn_id)
                .await;
            if let Err(e) = result {
                session.reply_error(&e).await;
            }
        }
    }
}

/// Drains the outbound queue into the socket until either side goes away.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = sink.send(msg).await {
            debug!("ws send error: {e}");
            break;
        }
    }
    let _ = sink.close().await;
}
