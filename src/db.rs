//! Postgres query layer for chatd.
//!
//! All durable state goes through this module.
//! Uses sqlx with compile-time-unchecked queries (runtime-checked)
//! to avoid needing a live DB at compile time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::ChatError;
use crate::store::{ChatStore, UserLookup};
use crate::types::{ChatMessage, Identity, Room, RoomId, UserId};

// ═══════════════════════════════════════════════════════════════
// Users
// ═══════════════════════════════════════════════════════════════

pub async fn get_user(pool: &PgPool, user_id: UserId) -> Result<Option<Identity>, ChatError> {
    let row: Option<Identity> = sqlx::query_as(
        r#"
        SELECT id, nickname, email FROM users WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<Identity>, ChatError> {
    let row: Option<Identity> = sqlx::query_as(
        r#"
        SELECT id, nickname, email FROM users WHERE email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ═══════════════════════════════════════════════════════════════
// Rooms
// ═══════════════════════════════════════════════════════════════

pub async fn room_exists(pool: &PgPool, room_id: RoomId) -> Result<bool, ChatError> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (SELECT 1 FROM rooms WHERE id = $1)
        "#,
    )
    .bind(room_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Insert the room row and its member rows in one transaction.
/// An unknown member id fails the foreign key and rolls everything back.
pub async fn create_room(pool: &PgPool, member_ids: &[UserId]) -> Result<Room, ChatError> {
    let mut tx = pool.begin().await?;

    let (id, created_at): (RoomId, DateTime<Utc>) = sqlx::query_as(
        r#"
        INSERT INTO rooms DEFAULT VALUES
        RETURNING id, created_at
        "#,
    )
    .fetch_one(&mut *tx)
    .await?;

    let raw_ids: Vec<i64> = member_ids.iter().map(|u| u.0).collect();
    sqlx::query(
        r#"
        INSERT INTO room_members (room_id, user_id)
        SELECT $1, member FROM UNNEST($2::BIGINT[]) AS member
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(id)
    .bind(&raw_ids)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let mut members = member_ids.to_vec();
    members.sort();
    members.dedup();
    Ok(Room {
        id,
        member_ids: members,
        created_at,
    })
}

/// Rooms the user was made a member of at creation time.
pub async fn rooms_for_user(pool: &PgPool, user_id: UserId) -> Result<Vec<RoomId>, ChatError> {
    let rows: Vec<RoomId> = sqlx::query_scalar(
        r#"
        SELECT room_id FROM room_members
        WHERE user_id = $1
        ORDER BY room_id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ═══════════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════════

pub async fn store_message(
    pool: &PgPool,
    room_id: RoomId,
    author_id: UserId,
    body: &str,
) -> Result<ChatMessage, ChatError> {
    let row: ChatMessage = sqlx::query_as(
        r#"
        INSERT INTO messages (room_id, author_id, body)
        VALUES ($1, $2, $3)
        RETURNING id, room_id, author_id, body, created_at
        "#,
    )
    .bind(room_id)
    .bind(author_id)
    .bind(body)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

// ═══════════════════════════════════════════════════════════════
// ChatStore over a pool
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn room_exists(&self, room_id: RoomId) -> Result<bool, ChatError> {
        room_exists(&self.pool, room_id).await
    }

    async fn create_room(&self, member_ids: &[UserId]) -> Result<Room, ChatError> {
        create_room(&self.pool, member_ids).await
    }

    async fn create_message(
        &self,
        room_id: RoomId,
        author_id: UserId,
        body: &str,
    ) -> Result<ChatMessage, ChatError> {
        store_message(&self.pool, room_id, author_id, body).await
    }

    async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomId>, ChatError> {
        rooms_for_user(&self.pool, user_id).await
    }

    async fn find_user(&self, lookup: &UserLookup) -> Result<Option<Identity>, ChatError> {
        match lookup {
            UserLookup::Id(id) => get_user(&self.pool, *id).await,
            UserLookup::Email(email) => get_user_by_email(&self.pool, email).await,
        }
    }
}
