use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, MessageKind, RoomId, RoomKind, UserId},
    error::StoreError,
    protocol::{Message, NewMessage, Room, User},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use tracing::{debug, warn};

use crate::{
    clamp_history_limit, MessageSubscription, RecordStore, StoreResult, SubscriptionHandle,
    SubscriptionHub,
};

const PRIVATE_ROOM_TOPIC: &str = "Özel Sohbet";

/// SQLite-backed record store with in-process message pub/sub.
pub struct SqliteRecordStore {
    pool: Pool<Sqlite>,
    hub: SubscriptionHub,
}

impl SqliteRecordStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url '{database_url}'"))?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to an in-memory url opens its own database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run record store migrations")?;
        Ok(Self {
            pool,
            hub: SubscriptionHub::new(),
        })
    }

    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts or updates a user. Identity is managed outside the chat
    /// client, so this is a seeding helper rather than a trait operation.
    pub async fn create_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, display_name, avatar, is_online, is_automated, color)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar = excluded.avatar,
                is_online = excluded.is_online,
                is_automated = excluded.is_automated,
                color = excluded.color",
        )
        .bind(user.id.as_str())
        .bind(&user.display_name)
        .bind(user.avatar.as_deref())
        .bind(i64::from(user.is_online))
        .bind(i64::from(user.is_automated))
        .bind(user.color.as_deref())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Creates a public room. Administrators own this in production.
    pub async fn create_public_room(
        &self,
        id: &RoomId,
        name: &str,
        topic: &str,
    ) -> StoreResult<Room> {
        sqlx::query("INSERT INTO rooms (id, name, topic, kind) VALUES (?, ?, ?, 'public')")
            .bind(id.as_str())
            .bind(name)
            .bind(topic)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Room {
            id: id.clone(),
            name: name.to_owned(),
            topic: topic.to_owned(),
            kind: RoomKind::Public,
            participants: Vec::new(),
        })
    }

    async fn room_exists(&self, room_id: &RoomId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM rooms WHERE id = ?")
            .bind(room_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.is_some())
    }

    async fn load_room(&self, room_id: &str) -> StoreResult<Room> {
        let row = sqlx::query("SELECT id, name, topic, kind FROM rooms WHERE id = ?")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| StoreError::not_found(format!("room {room_id} not found")))?;
        let mut room = room_from_row(&row)?;
        room.participants = self.load_participants(&room.id).await?;
        Ok(room)
    }

    async fn load_participants(&self, room_id: &RoomId) -> StoreResult<Vec<UserId>> {
        let rows = sqlx::query(
            "SELECT user_id FROM room_participants WHERE room_id = ? ORDER BY position ASC",
        )
        .bind(room_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("user_id")
                    .map(UserId)
                    .map_err(map_sqlx_error)
            })
            .collect()
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, display_name, avatar, is_online, is_automated, color
             FROM users ORDER BY created_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(user_from_row).collect()
    }

    async fn list_public_rooms(&self) -> StoreResult<Vec<Room>> {
        let rows = sqlx::query(
            "SELECT id, name, topic, kind FROM rooms WHERE kind = 'public' ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        let mut rooms = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut room = room_from_row(row)?;
            room.participants = self.load_participants(&room.id).await?;
            rooms.push(room);
        }
        Ok(rooms)
    }

    async fn find_private_room(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> StoreResult<Option<Room>> {
        let row = sqlx::query(
            "SELECT r.id FROM rooms r
             WHERE r.kind = 'private'
               AND EXISTS (SELECT 1 FROM room_participants p WHERE p.room_id = r.id AND p.user_id = ?)
               AND EXISTS (SELECT 1 FROM room_participants p WHERE p.room_id = r.id AND p.user_id = ?)
               AND (SELECT COUNT(*) FROM room_participants p WHERE p.room_id = r.id) = 2
             ORDER BY r.seq ASC
             LIMIT 1",
        )
        .bind(self_id.as_str())
        .bind(other_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let room_id: String = row.try_get("id").map_err(map_sqlx_error)?;
                self.load_room(&room_id).await.map(Some)
            }
            None => Ok(None),
        }
    }

    async fn create_private_room(&self, self_id: &UserId, other: &User) -> StoreResult<Room> {
        if self_id == &other.id {
            return Err(StoreError::new(
                shared::error::ErrorCode::Validation,
                "private room needs two distinct participants",
            ));
        }

        let room = Room {
            id: RoomId(uuid::Uuid::new_v4().to_string()),
            name: other.display_name.clone(),
            topic: PRIVATE_ROOM_TOPIC.to_owned(),
            kind: RoomKind::Private,
            participants: vec![self_id.clone(), other.id.clone()],
        };

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("INSERT INTO rooms (id, name, topic, kind) VALUES (?, ?, ?, 'private')")
            .bind(room.id.as_str())
            .bind(&room.name)
            .bind(&room.topic)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        for (position, user_id) in room.participants.iter().enumerate() {
            sqlx::query("INSERT INTO room_participants (room_id, user_id, position) VALUES (?, ?, ?)")
                .bind(room.id.as_str())
                .bind(user_id.as_str())
                .bind(position as i64)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(room_id = %room.id, "private room created");
        Ok(room)
    }

    async fn list_messages(&self, room_id: &RoomId, limit: u32) -> StoreResult<Vec<Message>> {
        let limit = clamp_history_limit(limit);
        let rows = sqlx::query(
            "SELECT * FROM (
                SELECT seq, id, room_id, sender_id, sender_name, sender_avatar, body, kind, color, created_at
                FROM messages
                WHERE room_id = ?
                ORDER BY created_at DESC, seq DESC
                LIMIT ?
             )
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(room_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn create_message(&self, draft: NewMessage) -> StoreResult<Message> {
        if draft.body.trim().is_empty() {
            return Err(StoreError::new(
                shared::error::ErrorCode::Validation,
                "message body must not be empty",
            ));
        }
        if !self.room_exists(&draft.room_id).await? {
            return Err(StoreError::not_found(format!(
                "room {} not found",
                draft.room_id
            )));
        }

        let message = Message::from_draft(
            draft,
            MessageId(uuid::Uuid::new_v4().to_string()),
            Utc::now(),
        );
        sqlx::query(
            "INSERT INTO messages (id, room_id, sender_id, sender_name, sender_avatar, body, kind, color, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.as_str())
        .bind(message.room_id.as_str())
        .bind(message.sender_id.as_str())
        .bind(&message.sender_name)
        .bind(message.sender_avatar.as_deref())
        .bind(&message.body)
        .bind(message.kind.as_str())
        .bind(message.color.as_deref())
        .bind(message.created_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let delivered = self.hub.publish(&message).await;
        debug!(
            message_id = %message.id,
            room_id = %message.room_id,
            delivered,
            "message stored"
        );
        Ok(message)
    }

    async fn subscribe_messages(&self, room_id: &RoomId) -> StoreResult<MessageSubscription> {
        if !self.room_exists(room_id).await? {
            return Err(StoreError::not_found(format!("room {room_id} not found")));
        }
        Ok(self.hub.subscribe(room_id).await)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()> {
        if !self.hub.unsubscribe(handle).await {
            warn!(handle = handle.0, "unsubscribe for unknown handle");
        }
        Ok(())
    }

    async fn list_blocks(&self, self_id: &UserId) -> StoreResult<Vec<UserId>> {
        let rows = sqlx::query(
            "SELECT blocked_id FROM blocks WHERE blocker_id = ? ORDER BY created_at ASC, blocked_id ASC",
        )
        .bind(self_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("blocked_id")
                    .map(UserId)
                    .map_err(map_sqlx_error)
            })
            .collect()
    }

    async fn create_block(&self, self_id: &UserId, other_id: &UserId) -> StoreResult<()> {
        sqlx::query("INSERT OR IGNORE INTO blocks (blocker_id, blocked_id) VALUES (?, ?)")
            .bind(self_id.as_str())
            .bind(other_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete_block(&self, self_id: &UserId, other_id: &UserId) -> StoreResult<()> {
        sqlx::query("DELETE FROM blocks WHERE blocker_id = ? AND blocked_id = ?")
            .bind(self_id.as_str())
            .bind(other_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn user_from_row(row: &SqliteRow) -> StoreResult<User> {
    Ok(User {
        id: UserId(row.try_get("id").map_err(map_sqlx_error)?),
        display_name: row.try_get("display_name").map_err(map_sqlx_error)?,
        avatar: row.try_get("avatar").map_err(map_sqlx_error)?,
        is_online: row.try_get::<i64, _>("is_online").map_err(map_sqlx_error)? != 0,
        is_automated: row.try_get::<i64, _>("is_automated").map_err(map_sqlx_error)? != 0,
        color: row.try_get("color").map_err(map_sqlx_error)?,
    })
}

fn room_from_row(row: &SqliteRow) -> StoreResult<Room> {
    let kind: String = row.try_get("kind").map_err(map_sqlx_error)?;
    let kind = RoomKind::parse(&kind)
        .ok_or_else(|| StoreError::malformed(format!("unknown room kind '{kind}'")))?;
    Ok(Room {
        id: RoomId(row.try_get("id").map_err(map_sqlx_error)?),
        name: row.try_get("name").map_err(map_sqlx_error)?,
        topic: row.try_get("topic").map_err(map_sqlx_error)?,
        kind,
        participants: Vec::new(),
    })
}

fn message_from_row(row: &SqliteRow) -> StoreResult<Message> {
    let kind: String = row.try_get("kind").map_err(map_sqlx_error)?;
    let kind = MessageKind::parse(&kind)
        .ok_or_else(|| StoreError::malformed(format!("unknown message kind '{kind}'")))?;
    let created_at_micros: i64 = row.try_get("created_at").map_err(map_sqlx_error)?;
    let created_at = DateTime::<Utc>::from_timestamp_micros(created_at_micros).ok_or_else(|| {
        StoreError::malformed(format!("timestamp {created_at_micros} out of range"))
    })?;
    Ok(Message {
        id: MessageId(row.try_get("id").map_err(map_sqlx_error)?),
        room_id: RoomId(row.try_get("room_id").map_err(map_sqlx_error)?),
        sender_id: UserId(row.try_get("sender_id").map_err(map_sqlx_error)?),
        sender_name: row.try_get("sender_name").map_err(map_sqlx_error)?,
        sender_avatar: row.try_get("sender_avatar").map_err(map_sqlx_error)?,
        body: row.try_get("body").map_err(map_sqlx_error)?,
        kind,
        created_at,
        color: row.try_get("color").map_err(map_sqlx_error)?,
    })
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::not_found("row not found"),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::network(err.to_string())
        }
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
            StoreError::malformed(err.to_string())
        }
        other => StoreError::internal(other.to_string()),
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
