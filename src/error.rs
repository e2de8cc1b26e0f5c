//! Error types for chatd.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::types::{ErrorKind, RoomId};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("no credential presented")]
    Unauthenticated,

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("no user matches the presented credential")]
    UnknownIdentity,

    #[error("room {0} does not exist")]
    RoomNotFound(RoomId),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ChatError {
    /// Kind reported to the requesting connection in an `exception` event.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Unauthenticated
            | ChatError::InvalidCredential(_)
            | ChatError::UnknownIdentity => ErrorKind::Unauthenticated,
            ChatError::RoomNotFound(_) => ErrorKind::RoomNotFound,
            ChatError::Db(_) | ChatError::Persistence(_) => ErrorKind::PersistenceFailure,
            ChatError::BadRequest(_) => ErrorKind::BadRequest,
        }
    }

    /// Message safe to hand back to a client. Store internals stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Db(_) | ChatError::Persistence(_) => "storage unavailable, try again".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::Unauthenticated
            | ChatError::InvalidCredential(_)
            | ChatError::UnknownIdentity => StatusCode::UNAUTHORIZED,
            ChatError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Db(_) | ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.client_message()).into_response()
    }
}
