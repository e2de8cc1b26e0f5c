//! Message ingestion: validate, persist, then fan out.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ChatError;
use crate::fanout::Fanout;
use crate::rooms::RoomValidator;
use crate::store::ChatStore;
use crate::types::{ChatMessage, ConnId, Identity, RoomId};

#[derive(Clone)]
pub struct MessageService {
    validator: RoomValidator,
    store: Arc<dyn ChatStore>,
    fanout: Fanout,
    max_len: usize,
}

impl MessageService {
    pub fn new(
        validator: RoomValidator,
        store: Arc<dyn ChatStore>,
        fanout: Fanout,
        max_len: usize,
    ) -> Self {
        Self {
            validator,
            store,
            fanout,
            max_len,
        }
    }

    /// Validate and persist. Nothing is written unless the room exists.
    pub async fn ingest(
        &self,
        room_id: RoomId,
        author: &Identity,
        body: &str,
    ) -> Result<ChatMessage, ChatError> {
        if body.trim().is_empty() {
            return Err(ChatError::BadRequest("message body is empty".into()));
        }
        if body.len() > self.max_len {
            return Err(ChatError::BadRequest(format!(
                "message body exceeds {} bytes",
                self.max_len
            )));
        }
        if !self.validator.exists(room_id).await? {
            return Err(ChatError::RoomNotFound(room_id));
        }
        self.store.create_message(room_id, author.id, body).await
    }

    /// Ingest, and only once the row is stored, deliver it to the room.
    /// `origin` is the sending connection, which never gets an echo.
    pub async fn send(
        &self,
        room_id: RoomId,
        author: &Identity,
        body: &str,
        origin: ConnId,
    ) -> Result<ChatMessage, ChatError> {
        let message = self.ingest(room_id, author, body).await.map_err(|e| {
            warn!(room_id = %room_id, user_id = %author.id, "send rejected: {e}");
            e
        })?;
        let report = self.fanout.broadcast(&message, Some(origin));
        debug!(
            message_id = message.id,
            room_id = %room_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "message fanned out"
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Peer, RoomRegistry};
    use crate::store::{MemoryStore, UserLookup};
    use crate::types::{Room, UserId};
    use async_trait::async_trait;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn peer(user: UserId) -> (Peer, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(8);
        let peer = Peer {
            conn_id: Uuid::new_v4(),
            user_id: user,
            outbound,
        };
        (peer, rx)
    }

    fn service(store: Arc<dyn ChatStore>, registry: Arc<RoomRegistry>) -> MessageService {
        MessageService::new(
            RoomValidator::new(Arc::clone(&store)),
            store,
            Fanout::new(registry),
            64,
        )
    }

    async fn two_users_in_a_room(store: &MemoryStore) -> (Identity, Identity, Room) {
        let a = store.insert_user("a", "a@example.com").await;
        let b = store.insert_user("b", "b@example.com").await;
        let room = store.create_room(&[a.id, b.id]).await.unwrap();
        (a, b, room)
    }

    #[tokio::test]
    async fn stored_then_delivered_to_everyone_but_the_sender() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoomRegistry::new());
        let (a, b, room) = two_users_in_a_room(&store).await;
        let (pa, mut rx_a) = peer(a.id);
        let (pb, mut rx_b) = peer(b.id);
        registry.open(pa.conn_id);
        registry.join(&pa, &[room.id]);
        registry.open(pb.conn_id);
        registry.join(&pb, &[room.id]);

        let svc = service(store.clone(), registry);
        let msg = svc.send(room.id, &a, "hi", pa.conn_id).await.unwrap();

        assert_eq!(msg.author_id, a.id);
        assert_eq!(store.messages_in(room.id).await, vec![msg]);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_room_persists_and_broadcasts_nothing() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoomRegistry::new());
        let (a, b, _room) = two_users_in_a_room(&store).await;
        let (pb, mut rx_b) = peer(b.id);
        registry.open(pb.conn_id);
        registry.join(&pb, &[RoomId(42)]);

        let err = service(store.clone(), registry)
            .send(RoomId(42), &a, "hi", Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::RoomNotFound(RoomId(42))));
        assert_eq!(store.message_count().await, 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn body_limits() {
        let store = Arc::new(MemoryStore::new());
        let (a, _b, room) = two_users_in_a_room(&store).await;
        let svc = service(store.clone(), Arc::new(RoomRegistry::new()));

        for body in ["   ".to_string(), "x".repeat(65)] {
            let err = svc.ingest(room.id, &a, &body).await.unwrap_err();
            assert!(matches!(err, ChatError::BadRequest(_)));
        }
        assert_eq!(store.message_count().await, 0);
    }

    /// Rooms exist but every write fails.
    struct BrokenWrites;

    #[async_trait]
    impl ChatStore for BrokenWrites {
        async fn room_exists(&self, _: RoomId) -> Result<bool, ChatError> {
            Ok(true)
        }
        async fn create_room(&self, _: &[UserId]) -> Result<Room, ChatError> {
            Err(ChatError::Persistence("disk full".into()))
        }
        async fn create_message(&self, _: RoomId, _: UserId, _: &str) -> Result<ChatMessage, ChatError> {
            Err(ChatError::Persistence("disk full".into()))
        }
        async fn rooms_for_user(&self, _: UserId) -> Result<Vec<RoomId>, ChatError> {
            Ok(Vec::new())
        }
        async fn find_user(&self, _: &UserLookup) -> Result<Option<Identity>, ChatError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn failed_write_never_broadcasts() {
        let registry = Arc::new(RoomRegistry::new());
        let (pb, mut rx_b) = peer(UserId(2));
        registry.open(pb.conn_id);
        registry.join(&pb, &[RoomId(1)]);
        let author = Identity {
            id: UserId(1),
            nickname: "a".into(),
            email: "a@example.com".into(),
        };

        let err = service(Arc::new(BrokenWrites), registry)
            .send(RoomId(1), &author, "hi", Uuid::new_v4())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::types::ErrorKind::PersistenceFailure);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn sender_leaving_does_not_cancel_delivery() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoomRegistry::new());
        let (a, b, room) = two_users_in_a_room(&store).await;
        let (pa, _rx_a) = peer(a.id);
        let (pb, mut rx_b) = peer(b.id);
        registry.open(pa.conn_id);
        registry.join(&pa, &[room.id]);
        registry.open(pb.conn_id);
        registry.join(&pb, &[room.id]);

        registry.leave_all(pa.conn_id);
        service(store, Arc::clone(&registry))
            .send(room.id, &a, "late", pa.conn_id)
            .await
            .unwrap();

        assert!(rx_b.try_recv().is_ok());
    }
}
