//! HTTP surface: the chat gateway plus a small REST companion.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::auth::Handshake;
use crate::error::ChatError;
use crate::state::AppState;
use crate::types::{RoomId, UserId};
use crate::ws;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket endpoint.
        .route("/ws", get(ws::ws_handler))
        .route("/chats", get(list_rooms))
        // Health check (useful for K8s liveness probes).
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct RoomList {
    pub user_id: UserId,
    pub room_ids: Vec<RoomId>,
}

/// GET /chats — rooms the caller was made a member of.
async fn list_rooms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RoomList>, ChatError> {
    let identity = state
        .authenticator
        .authenticate(Handshake::from_parts(&headers, None))
        .await?;
    let room_ids = state.store.rooms_for_user(identity.id).await?;
    Ok(Json(RoomList {
        user_id: identity.id,
        room_ids,
    }))
}

/// Liveness probe.
async fn healthz() -> &'static str {
    "ok"
}
