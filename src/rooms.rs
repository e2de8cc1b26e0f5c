//! Room existence checks, joins, and room creation.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ChatError;
use crate::registry::{Peer, RoomRegistry};
use crate::store::ChatStore;
use crate::types::{Room, RoomId, UserId};

/// Drop repeats, keeping first-seen order.
pub fn dedup_ids<T: Copy + Eq + std::hash::Hash>(ids: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Gate in front of every join and send: referenced rooms must exist.
#[derive(Clone)]
pub struct RoomValidator {
    store: Arc<dyn ChatStore>,
}

impl RoomValidator {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn exists(&self, room_id: RoomId) -> Result<bool, ChatError> {
        self.store.room_exists(room_id).await
    }

    /// Fails on the first missing id; later ids are not checked.
    pub async fn ensure_all_exist(&self, room_ids: &[RoomId]) -> Result<(), ChatError> {
        for &room_id in room_ids {
            if !self.exists(room_id).await? {
                return Err(ChatError::RoomNotFound(room_id));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MembershipManager {
    validator: RoomValidator,
    registry: Arc<RoomRegistry>,
}

impl MembershipManager {
    pub fn new(validator: RoomValidator, registry: Arc<RoomRegistry>) -> Self {
        Self { validator, registry }
    }

    /// Subscribe `peer` to all of `room_ids`, or to none of them if any is
    /// missing. Returns the de-duplicated ids that were joined; empty when
    /// the connection closed while the rooms were being checked.
    pub async fn join(&self, peer: &Peer, room_ids: &[RoomId]) -> Result<Vec<RoomId>, ChatError> {
        let room_ids = dedup_ids(room_ids);
        self.validator.ensure_all_exist(&room_ids).await?;
        let Some(added) = self.registry.join(peer, &room_ids) else {
            debug!(conn_id = %peer.conn_id, "connection closed before join completed");
            return Ok(Vec::new());
        };
        debug!(
            conn_id = %peer.conn_id,
            user_id = %peer.user_id,
            rooms = ?room_ids,
            added,
            "joined rooms"
        );
        Ok(room_ids)
    }
}

#[derive(Clone)]
pub struct RoomCreator {
    store: Arc<dyn ChatStore>,
}

impl RoomCreator {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, member_ids: &[UserId]) -> Result<Room, ChatError> {
        let members = dedup_ids(member_ids);
        if members.is_empty() {
            return Err(ChatError::BadRequest("a room needs at least one member".into()));
        }
        let room = self.store.create_room(&members).await?;
        info!(room_id = %room.id, members = room.member_ids.len(), "room created");
        Ok(room)
    }
}
