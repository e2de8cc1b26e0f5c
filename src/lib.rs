//! chatd — real-time chat gateway.
//!
//! Authenticated WebSocket sessions join rooms that must exist in Postgres;
//! each stored message is fanned out to the room's other live sessions.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fanout;
pub mod messages;
pub mod registry;
pub mod rooms;
pub mod routes;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;
