//! Delivery of stored messages to the live members of a room.

use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error};

use crate::registry::RoomRegistry;
use crate::types::{ChatMessage, ConnId, ServerEvent};

/// Outcome of one broadcast, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct Fanout {
    registry: Arc<RoomRegistry>,
}

impl Fanout {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Queue `message` for every connection subscribed to its room, skipping
    /// `exclude`. Each delivery stands alone: a closed or saturated peer is
    /// counted and skipped, never retried.
    pub fn broadcast(&self, message: &ChatMessage, exclude: Option<ConnId>) -> FanoutReport {
        let mut report = FanoutReport::default();

        let payload = match serde_json::to_string(&ServerEvent::ReceiveMessage(message.body.clone())) {
            Ok(json) => json,
            Err(e) => {
                error!(message_id = message.id, "serialize error: {e}");
                return report;
            }
        };

        let members = self.registry.members_of(message.room_id);
        for peer in members.iter().filter(|p| Some(p.conn_id) != exclude) {
            match peer.outbound.try_send(Message::Text(payload.clone().into())) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(conn_id = %peer.conn_id, room_id = %message.room_id, "outbound queue full, message dropped");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(conn_id = %peer.conn_id, room_id = %message.room_id, "peer gone before delivery");
                    report.dropped += 1;
                }
            }
        }
        report
    }
}
