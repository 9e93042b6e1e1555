use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{MessageId, MessageKind, RoomId, RoomKind, UserId},
    error::StoreError,
    protocol::{Message, NewMessage, Room, User},
};
use storage::{
    MessageSubscription, RecordStore, StoreResult, SubscriptionHandle, SubscriptionHub,
};
use tokio::sync::Notify;

use crate::completion::{CompletionError, CompletionService};

/// In-memory record store with switchable failures.
#[derive(Default)]
pub(crate) struct FakeStore {
    pub users: Mutex<Vec<User>>,
    pub public_rooms: Mutex<Vec<Room>>,
    pub private_rooms: Mutex<Vec<Room>>,
    pub messages: Mutex<Vec<Message>>,
    pub blocks: Mutex<HashSet<(UserId, UserId)>>,
    pub hub: SubscriptionHub,

    pub fail_users: AtomicBool,
    pub fail_rooms: AtomicBool,
    pub fail_history: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_assistant_writes: AtomicBool,
    pub fail_private_rooms: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_block_list: AtomicBool,
    pub fail_block_writes: AtomicBool,

    pub users_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    users_gate: Mutex<Option<Arc<Notify>>>,
    history_gates: Mutex<HashMap<RoomId, Arc<Notify>>>,
    subscribe_gates: Mutex<HashMap<RoomId, Arc<Notify>>>,
    ticks: AtomicI64,
    next_id: AtomicUsize,
}

impl FakeStore {
    /// `me`, `alice` and the automated `bot`; public rooms `general` and `tech`.
    pub fn seeded() -> Arc<Self> {
        let store = Self::default();
        let mut bot = User::new("bot", "Workigom AI");
        bot.is_automated = true;
        *lock(&store.users) = vec![
            User::new("me", "romance"),
            User::new("alice", "Alice"),
            bot,
        ];
        *lock(&store.public_rooms) = vec![
            public_room("general", "Genel"),
            public_room("tech", "Teknoloji"),
        ];
        Arc::new(store)
    }

    pub fn fail(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    /// Timestamps strictly increase across every message the fake creates.
    pub fn next_timestamp(&self) -> DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        base_time() + Duration::milliseconds(tick)
    }

    pub fn message(&self, room: &str, sender: &str, body: &str) -> Message {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Message {
            id: MessageId::new(format!("m{id}")),
            room_id: RoomId::from(room),
            sender_id: UserId::from(sender),
            sender_name: sender.to_owned(),
            sender_avatar: None,
            body: body.to_owned(),
            kind: MessageKind::User,
            created_at: self.next_timestamp(),
            color: None,
        }
    }

    /// Stores a message without publishing it.
    pub fn push_history(&self, room: &str, sender: &str, body: &str) -> Message {
        let message = self.message(room, sender, body);
        lock(&self.messages).push(message.clone());
        message
    }

    /// Simulates a creation event arriving from another client.
    pub async fn deliver(&self, message: &Message) -> usize {
        lock(&self.messages).push(message.clone());
        self.hub.publish(message).await
    }

    pub fn add_private_room(&self, id: &str, a: &str, b: &str) -> Room {
        let room = Room {
            id: RoomId::from(id),
            name: b.to_owned(),
            topic: "Özel Sohbet".into(),
            kind: RoomKind::Private,
            participants: vec![UserId::from(a), UserId::from(b)],
        };
        lock(&self.private_rooms).push(room.clone());
        room
    }

    /// History loads of `room` wait until the returned notify fires.
    pub fn gate_history(&self, room: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.history_gates).insert(RoomId::from(room), Arc::clone(&gate));
        gate
    }

    /// Subscriptions to `room` wait until the returned notify fires.
    pub fn gate_subscribe(&self, room: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.subscribe_gates).insert(RoomId::from(room), Arc::clone(&gate));
        gate
    }

    /// User listings wait until the returned notify fires.
    pub fn gate_users(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.users_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn stored_messages(&self, room: &str) -> Vec<Message> {
        lock(&self.messages)
            .iter()
            .filter(|m| m.room_id.as_str() == room)
            .cloned()
            .collect()
    }

    fn failing(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.users_calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.users_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if Self::failing(&self.fail_users) {
            return Err(StoreError::network("users unavailable"));
        }
        Ok(lock(&self.users).clone())
    }

    async fn list_public_rooms(&self) -> StoreResult<Vec<Room>> {
        if Self::failing(&self.fail_rooms) {
            return Err(StoreError::network("rooms unavailable"));
        }
        Ok(lock(&self.public_rooms).clone())
    }

    async fn find_private_room(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> StoreResult<Option<Room>> {
        if Self::failing(&self.fail_private_rooms) {
            return Err(StoreError::network("private rooms unavailable"));
        }
        Ok(lock(&self.private_rooms)
            .iter()
            .find(|room| room.has_exact_participants(self_id, other_id))
            .cloned())
    }

    async fn create_private_room(&self, self_id: &UserId, other: &User) -> StoreResult<Room> {
        if Self::failing(&self.fail_private_rooms) {
            return Err(StoreError::network("private rooms unavailable"));
        }
        let id = format!("private-{}", lock(&self.private_rooms).len() + 1);
        Ok(self.add_private_room(&id, self_id.as_str(), other.id.as_str()))
    }

    async fn list_messages(&self, room_id: &RoomId, limit: u32) -> StoreResult<Vec<Message>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.history_gates).get(room_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if Self::failing(&self.fail_history) {
            return Err(StoreError::network("history unavailable"));
        }
        let messages = self.stored_messages(room_id.as_str());
        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn create_message(&self, draft: NewMessage) -> StoreResult<Message> {
        if Self::failing(&self.fail_writes)
            || (draft.kind == MessageKind::Assistant
                && Self::failing(&self.fail_assistant_writes))
        {
            return Err(StoreError::network("write failed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message = Message::from_draft(
            draft,
            MessageId::new(format!("m{id}")),
            self.next_timestamp(),
        );
        self.deliver(&message).await;
        Ok(message)
    }

    async fn subscribe_messages(&self, room_id: &RoomId) -> StoreResult<MessageSubscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.subscribe_gates).get(room_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if Self::failing(&self.fail_subscribe) {
            return Err(StoreError::network("realtime unavailable"));
        }
        Ok(self.hub.subscribe(room_id).await)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()> {
        self.hub.unsubscribe(handle).await;
        Ok(())
    }

    async fn list_blocks(&self, self_id: &UserId) -> StoreResult<Vec<UserId>> {
        if Self::failing(&self.fail_block_list) {
            return Err(StoreError::network("blocks unavailable"));
        }
        Ok(lock(&self.blocks)
            .iter()
            .filter(|(blocker, _)| blocker == self_id)
            .map(|(_, blocked)| blocked.clone())
            .collect())
    }

    async fn create_block(&self, self_id: &UserId, other_id: &UserId) -> StoreResult<()> {
        if Self::failing(&self.fail_block_writes) {
            return Err(StoreError::network("block write failed"));
        }
        lock(&self.blocks).insert((self_id.clone(), other_id.clone()));
        Ok(())
    }

    async fn delete_block(&self, self_id: &UserId, other_id: &UserId) -> StoreResult<()> {
        if Self::failing(&self.fail_block_writes) {
            return Err(StoreError::network("block write failed"));
        }
        lock(&self.blocks).remove(&(self_id.clone(), other_id.clone()));
        Ok(())
    }
}

/// Completion service answering from a queue; `Merhaba!` once it runs dry.
#[derive(Default)]
pub(crate) struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_replies(
        replies: impl IntoIterator<Item = Result<String, CompletionError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, history: &[Message]) -> Result<String, CompletionError> {
        lock(&self.calls).push(history.to_vec());
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Ok("Merhaba!".to_owned()))
    }
}

pub(crate) fn public_room(id: &str, name: &str) -> Room {
    Room {
        id: RoomId::from(id),
        name: name.to_owned(),
        topic: String::new(),
        kind: RoomKind::Public,
        participants: Vec::new(),
    }
}

fn base_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("valid base time")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("fake store lock poisoned")
}
