//! Domain records and the chat wire protocol.
//!
//! Frames are JSON text, adjacently tagged:
//! `{"event": "send_message", "data": {"room_id": 7, "body": "hi"}}`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct RoomId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique id of one live connection.
pub type ConnId = Uuid;

// ═══════════════════════════════════════════════════════════════
// Durable records
// ═══════════════════════════════════════════════════════════════

/// Who is on the other end of a connection. Fixed at handshake time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Identity {
    pub id: UserId,
    pub nickname: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub id: RoomId,
    pub member_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

/// A stored chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub room_id: RoomId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════
// Client → Server events
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    CreateRoom(CreateRoomMsg),
    JoinRooms(JoinRoomsMsg),
    SendMessage(SendMessageMsg),
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomMsg {
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomsMsg {
    pub room_ids: Vec<RoomId>,
}

/// The author is never read from the payload; it comes from the session.
#[derive(Debug, Deserialize)]
pub struct SendMessageMsg {
    pub room_id: RoomId,
    pub body: String,
}

// ═══════════════════════════════════════════════════════════════
// Server → Client events
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Body of a message posted to a room this connection joined.
    ReceiveMessage(String),
    RoomCreated(RoomCreatedMsg),
    RoomsJoined(RoomsJoinedMsg),
    Exception(ExceptionMsg),
}

#[derive(Debug, Serialize)]
pub struct RoomCreatedMsg {
    pub room_id: RoomId,
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Serialize)]
pub struct RoomsJoinedMsg {
    pub room_ids: Vec<RoomId>,
}

#[derive(Debug, Serialize)]
pub struct ExceptionMsg {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    RoomNotFound,
    PersistenceFailure,
    BadRequest,
}
