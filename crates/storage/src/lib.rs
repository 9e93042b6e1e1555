use async_trait::async_trait;
use shared::{
    domain::{RoomId, UserId},
    error::StoreError,
    protocol::{Message, NewMessage, Room, User},
};

mod sqlite;
mod subscriptions;

pub use sqlite::SqliteRecordStore;
pub use subscriptions::{MessageSubscription, SubscriptionHandle, SubscriptionHub};

/// Default page size for history loads.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
/// Hard cap applied to any history request.
pub const MAX_HISTORY_LIMIT: u32 = 100;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Record store plus message pub/sub, as seen by the chat client.
///
/// Implementations own persistence and delivery. Subscriptions are keyed by
/// room: a subscriber only ever receives creation events for the room it
/// subscribed to.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn list_public_rooms(&self) -> StoreResult<Vec<Room>>;
    async fn find_private_room(&self, self_id: &UserId, other_id: &UserId)
        -> StoreResult<Option<Room>>;
    async fn create_private_room(&self, self_id: &UserId, other: &User) -> StoreResult<Room>;
    /// Most recent `limit` messages of a room, oldest first.
    async fn list_messages(&self, room_id: &RoomId, limit: u32) -> StoreResult<Vec<Message>>;
    async fn create_message(&self, draft: NewMessage) -> StoreResult<Message>;
    async fn subscribe_messages(&self, room_id: &RoomId) -> StoreResult<MessageSubscription>;
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()>;
    async fn list_blocks(&self, self_id: &UserId) -> StoreResult<Vec<UserId>>;
    async fn create_block(&self, self_id: &UserId, other_id: &UserId) -> StoreResult<()>;
    async fn delete_block(&self, self_id: &UserId, other_id: &UserId) -> StoreResult<()>;
}

pub fn clamp_history_limit(requested: u32) -> u32 {
    requested.clamp(1, MAX_HISTORY_LIMIT)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
