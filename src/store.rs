//! Persistence seam for the chat subsystem.
//!
//! `PgStore` (see `db`) is the production backend. `MemoryStore` keeps the
//! same referential rules in process memory and backs the test suites.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::ChatError;
use crate::types::{ChatMessage, Identity, Room, RoomId, UserId};

/// How an identity is looked up after its credential has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Email(String),
    Id(UserId),
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn room_exists(&self, room_id: RoomId) -> Result<bool, ChatError>;

    /// Create a room and its member rows atomically.
    async fn create_room(&self, member_ids: &[UserId]) -> Result<Room, ChatError>;

    async fn create_message(
        &self,
        room_id: RoomId,
        author_id: UserId,
        body: &str,
    ) -> Result<ChatMessage, ChatError>;

    async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomId>, ChatError>;

    async fn find_user(&self, lookup: &UserLookup) -> Result<Option<Identity>, ChatError>;
}

// ═══════════════════════════════════════════════════════════════
// In-memory backend
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, Identity>,
    rooms: HashMap<RoomId, Room>,
    messages: Vec<ChatMessage>,
    next_user: i64,
    next_room: i64,
    next_message: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, nickname: &str, email: &str) -> Identity {
        let mut t = self.tables.write().await;
        t.next_user += 1;
        let user = Identity {
            id: UserId(t.next_user),
            nickname: nickname.into(),
            email: email.into(),
        };
        t.users.insert(user.id, user.clone());
        user
    }

    /// Stored messages for a room, oldest first.
    pub async fn messages_in(&self, room_id: RoomId) -> Vec<ChatMessage> {
        let t = self.tables.read().await;
        t.messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }

    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn room_exists(&self, room_id: RoomId) -> Result<bool, ChatError> {
        Ok(self.tables.read().await.rooms.contains_key(&room_id))
    }

    async fn create_room(&self, member_ids: &[UserId]) -> Result<Room, ChatError> {
        let mut t = self.tables.write().await;
        if let Some(missing) = member_ids.iter().find(|id| !t.users.contains_key(*id)) {
            return Err(ChatError::Persistence(format!("user {missing} does not exist")));
        }
        let members: BTreeSet<UserId> = member_ids.iter().copied().collect();
        t.next_room += 1;
        let room = Room {
            id: RoomId(t.next_room),
            member_ids: members.into_iter().collect(),
            created_at: Utc::now(),
        };
        t.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn create_message(
        &self,
        room_id: RoomId,
        author_id: UserId,
        body: &str,
    ) -> Result<ChatMessage, ChatError> {
        let mut t = self.tables.write().await;
        if !t.rooms.contains_key(&room_id) {
            return Err(ChatError::Persistence(format!("room {room_id} does not exist")));
        }
        if !t.users.contains_key(&author_id) {
            return Err(ChatError::Persistence(format!("user {author_id} does not exist")));
        }
        t.next_message += 1;
        let message = ChatMessage {
            id: t.next_message,
            room_id,
            author_id,
            body: body.into(),
            created_at: Utc::now(),
        };
        t.messages.push(message.clone());
        Ok(message)
    }

    async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomId>, ChatError> {
        let t = self.tables.read().await;
        let mut ids: Vec<RoomId> = t
            .rooms
            .values()
            .filter(|r| r.member_ids.contains(&user_id))
            .map(|r| r.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn find_user(&self, lookup: &UserLookup) -> Result<Option<Identity>, ChatError> {
        let t = self.tables.read().await;
        let found = match lookup {
            UserLookup::Id(id) => t.users.get(id).cloned(),
            UserLookup::Email(email) => t.users.values().find(|u| &u.email == email).cloned(),
        };
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn room_creation_enforces_member_rows() {
        let store = MemoryStore::new();
        let alice = store.insert_user("alice", "alice@example.com").await;

        let err = store.create_room(&[alice.id, UserId(404)]).await.unwrap_err();
        assert!(matches!(err, ChatError::Persistence(_)));
        assert!(!store.room_exists(RoomId(1)).await.unwrap());

        let room = store.create_room(&[alice.id, alice.id]).await.unwrap();
        assert_eq!(room.member_ids, vec![alice.id]);
        assert_eq!(store.rooms_for_user(alice.id).await.unwrap(), vec![room.id]);
    }

    #[tokio::test]
    async fn messages_require_an_existing_room() {
        let store = MemoryStore::new();
        let alice = store.insert_user("alice", "alice@example.com").await;

        assert!(store.create_message(RoomId(42), alice.id, "hi").await.is_err());
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn users_resolve_by_email_or_id() {
        let store = MemoryStore::new();
        let bob = store.insert_user("bob", "bob@example.com").await;

        let by_email = store
            .find_user(&UserLookup::Email("bob@example.com".into()))
            .await
            .unwrap();
        assert_eq!(by_email, Some(bob.clone()));
        assert_eq!(store.find_user(&UserLookup::Id(bob.id)).await.unwrap(), Some(bob));
        assert_eq!(store.find_user(&UserLookup::Id(UserId(9))).await.unwrap(), None);
    }
}
