//! Live room membership.
//!
//! Maps each room to the connections currently subscribed to it, plus the
//! reverse index used to drop a connection from everything at once. Nothing
//! here is persisted; a restart starts empty and clients re-join.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{ConnId, RoomId, UserId};

/// Outbound queue feeding one connection's socket writer.
pub type Outbound = mpsc::Sender<Message>;

/// Registry handle for one connection: who it is and where to write.
#[derive(Debug, Clone)]
pub struct Peer {
    pub conn_id: ConnId,
    pub user_id: UserId,
    pub outbound: Outbound,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, HashMap<ConnId, Peer>>,
    joined: DashMap<ConnId, HashSet<RoomId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a connection. Joins are only accepted between `open`
    /// and `leave_all`.
    pub fn open(&self, conn_id: ConnId) {
        self.joined.entry(conn_id).or_default();
    }

    /// Subscribe `peer` to every room in `room_ids`. Re-joining is a no-op.
    /// Returns how many subscriptions were new, or `None` if the connection
    /// is not open (never opened, or already cleaned up).
    pub fn join(&self, peer: &Peer, room_ids: &[RoomId]) -> Option<usize> {
        // Holding the reverse-index entry keeps `leave_all` out until every
        // room below is recorded.
        let mut joined = self.joined.get_mut(&peer.conn_id)?;
        let mut added = 0;
        for &room_id in room_ids {
            let inserted = self
                .rooms
                .entry(room_id)
                .or_default()
                .insert(peer.conn_id, peer.clone())
                .is_none();
            if inserted {
                added += 1;
            }
            joined.insert(room_id);
        }
        Some(added)
    }

    /// Remove the connection from every room it joined, pruning rooms left
    /// empty, and close it to further joins. Safe to call for a connection
    /// that never joined anything.
    pub fn leave_all(&self, conn_id: ConnId) -> Vec<RoomId> {
        let Some((_, rooms)) = self.joined.remove(&conn_id) else {
            return Vec::new();
        };
        for room_id in &rooms {
            if let Some(mut members) = self.rooms.get_mut(room_id) {
                members.remove(&conn_id);
            }
            self.rooms.remove_if(room_id, |_, members| members.is_empty());
        }
        rooms.into_iter().collect()
    }

    /// Snapshot of the peers subscribed to `room_id` right now.
    pub fn members_of(&self, room_id: RoomId) -> Vec<Peer> {
        self.rooms
            .get(&room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, conn_id: ConnId) -> HashSet<RoomId> {
        self.joined
            .get(&conn_id)
            .map(|rooms| rooms.clone())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

/// Ties a connection's registry entries to its lifetime. Dropping the guard
/// removes the connection from every room, whichever way the session ended.
pub struct Membership {
    registry: Arc<RoomRegistry>,
    conn_id: ConnId,
}

impl Membership {
    pub fn new(registry: Arc<RoomRegistry>, conn_id: ConnId) -> Self {
        registry.open(conn_id);
        Self { registry, conn_id }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        let left = self.registry.leave_all(self.conn_id);
        debug!(conn_id = %self.conn_id, rooms = left.len(), "registry cleanup");
    }
}
