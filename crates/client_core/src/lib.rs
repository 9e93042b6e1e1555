use std::sync::{Arc, Weak};

use chrono::Utc;
use futures::{stream::BoxStream, StreamExt};
use shared::{
    domain::{MessageId, MessageKind, RoomId, UserId},
    protocol::{Message, NewMessage, Room, User},
};
use storage::{RecordStore, SubscriptionHandle};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod block_registry;
pub mod completion;
pub mod config;
pub mod directory;
pub mod dm_resolver;
pub mod error;
pub mod message_cache;

pub use block_registry::BlockRegistry;
pub use completion::{
    CompletionError, CompletionService, HttpCompletionService, MissingCompletionService,
};
pub use config::{load_settings, load_settings_from, ClientSettings};
pub use directory::{RoomDirectory, UserRoster};
pub use dm_resolver::{DmResolution, DmResolver};
pub use error::{DmRejection, SessionError};
pub use message_cache::MessageCache;

const SYSTEM_SENDER_ID: &str = "system";
const SYSTEM_SENDER_NAME: &str = "Sistem";
const HISTORY_UNAVAILABLE_NOTICE: &str =
    "Mesaj geçmişi yüklenemedi. Bağlantınızı kontrol edip odaya yeniden girin.";
const REPLY_NOT_SAVED_NOTICE: &str = "Asistanın yanıtı kaydedilemedi.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No room selected: before sign-in, after sign-out.
    Idle,
    /// History load and subscription setup in flight.
    Switching,
    Active,
    /// Two-party room whose counterpart is blocked. The subscription stays
    /// live; only the view and its events are suppressed.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The id is not in the directory; the previous room stays active.
    UnknownRoom,
    /// Another switch started before this one finished.
    Superseded,
    Entered(SessionPhase),
}

/// What the presentation layer renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub room: Option<Room>,
    pub phase: SessionPhase,
    pub blocked: bool,
    /// Empty while blocked.
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged {
        room_id: Option<RoomId>,
        phase: SessionPhase,
    },
    MessagesReplaced {
        room_id: RoomId,
        count: usize,
    },
    MessageAppended {
        message: Message,
    },
    RoomAdded {
        room: Room,
    },
    Error(String),
}

struct LiveSubscription {
    handle: SubscriptionHandle,
    room_id: RoomId,
    task: JoinHandle<()>,
}

struct SessionState {
    user: Option<User>,
    phase: SessionPhase,
    active_room: Option<RoomId>,
    /// Bumped on every switch, sign-in and sign-out. Async results carry the
    /// value they were issued under and are dropped when it moved on.
    generation: u64,
    directory: RoomDirectory,
    roster: UserRoster,
    cache: MessageCache,
    /// Whether the active room's counterpart is blocked. Set when the switch
    /// starts, so it holds through `Switching` too.
    room_blocked: bool,
    subscription: Option<LiveSubscription>,
    allow_direct_messages: bool,
}

impl SessionState {
    fn new(settings: &ClientSettings) -> Self {
        Self {
            user: None,
            phase: SessionPhase::Idle,
            active_room: None,
            generation: 0,
            directory: RoomDirectory::default(),
            roster: UserRoster::default(),
            cache: MessageCache::new(settings.max_cached_messages),
            room_blocked: false,
            subscription: None,
            allow_direct_messages: settings.allow_direct_messages,
        }
    }

    fn is_current(&self, generation: u64, room_id: &RoomId) -> bool {
        self.generation == generation && self.active_room.as_ref() == Some(room_id)
    }

    fn active_room(&self) -> Option<&Room> {
        self.active_room
            .as_ref()
            .and_then(|id| self.directory.get(id))
    }
}

/// Owns the active room of a signed-in user: its history, its live
/// subscription, and whether the block list hides it.
pub struct RoomSessionManager {
    store: Arc<dyn RecordStore>,
    completion: Arc<dyn CompletionService>,
    settings: ClientSettings,
    blocks: BlockRegistry,
    dm_resolver: DmResolver,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl RoomSessionManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        completion: Arc<dyn CompletionService>,
        settings: ClientSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            blocks: BlockRegistry::new(Arc::clone(&store)),
            dm_resolver: DmResolver::new(Arc::clone(&store)),
            inner: Mutex::new(SessionState::new(&settings)),
            store,
            completion,
            settings,
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn block_registry(&self) -> &BlockRegistry {
        &self.blocks
    }

    /// Starts a fresh session for `user`. Returns the room to open first.
    pub async fn sign_in(&self, user: User) -> Option<RoomId> {
        // The previous session ends here: switches issued while the load
        // below runs see no user and fail.
        let previous = {
            let mut guard = self.inner.lock().await;
            let generation = guard.generation + 1;
            let previous = guard.subscription.take();
            *guard = SessionState::new(&self.settings);
            guard.generation = generation;
            previous
        };
        if let Some(previous) = previous {
            self.close_subscription(previous).await;
        }

        let (roster, directory, blocked) = tokio::join!(
            UserRoster::load(self.store.as_ref(), &user),
            RoomDirectory::load(self.store.as_ref()),
            self.blocks.load(&user.id),
        );
        info!(
            user_id = %user.id,
            rooms = directory.rooms().len(),
            users = roster.users().len(),
            blocked,
            demo_mode = directory.is_demo_mode(),
            "signed in"
        );

        let first_room = directory.rooms().first().map(|room| room.id.clone());
        let leftover = {
            let mut guard = self.inner.lock().await;
            let generation = guard.generation + 1;
            let leftover = guard.subscription.take();
            *guard = SessionState::new(&self.settings);
            guard.generation = generation;
            guard.user = Some(user);
            guard.directory = directory;
            guard.roster = roster;
            leftover
        };
        if let Some(leftover) = leftover {
            self.close_subscription(leftover).await;
        }
        self.emit_phase(None, SessionPhase::Idle);
        first_room
    }

    /// Cancels the live subscription and discards all session state.
    pub async fn sign_out(&self) {
        let previous = {
            let mut guard = self.inner.lock().await;
            let generation = guard.generation + 1;
            let previous = guard.subscription.take();
            *guard = SessionState::new(&self.settings);
            guard.generation = generation;
            previous
        };
        if let Some(previous) = previous {
            self.close_subscription(previous).await;
        }
        self.blocks.clear().await;
        info!("signed out");
        self.emit_phase(None, SessionPhase::Idle);
    }

    pub async fn switch_room(
        self: &Arc<Self>,
        room_id: &RoomId,
    ) -> Result<SwitchOutcome, SessionError> {
        let (room, generation, previous) = {
            let mut guard = self.inner.lock().await;
            let self_id = guard
                .user
                .as_ref()
                .map(|user| user.id.clone())
                .ok_or(SessionError::NotSignedIn)?;
            let Some(room) = guard.directory.get(room_id).cloned() else {
                debug!(room_id = %room_id, "ignoring switch to unknown room");
                return Ok(SwitchOutcome::UnknownRoom);
            };
            guard.generation += 1;
            guard.active_room = Some(room.id.clone());
            guard.phase = SessionPhase::Switching;
            guard.room_blocked = self.blocks.blocks_room(&room, &self_id).await;
            let previous = guard.subscription.take();
            (room, guard.generation, previous)
        };
        self.emit_phase(Some(room.id.clone()), SessionPhase::Switching);

        // At most one live subscription: the old one is gone before the
        // new room is touched.
        if let Some(previous) = previous {
            self.close_subscription(previous).await;
        }

        let history = if room.is_synthetic() {
            vec![welcome_message(&room)]
        } else {
            match self
                .store
                .list_messages(&room.id, self.settings.history_page_size)
                .await
            {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(room_id = %room.id, error = %err, "history load failed");
                    vec![system_message(&room.id, HISTORY_UNAVAILABLE_NOTICE)]
                }
            }
        };

        let count = {
            let mut guard = self.inner.lock().await;
            if !guard.is_current(generation, &room.id) {
                debug!(room_id = %room.id, "discarding stale history");
                return Ok(SwitchOutcome::Superseded);
            }
            guard.cache.replace(history);
            guard.cache.len()
        };
        let _ = self.events.send(SessionEvent::MessagesReplaced {
            room_id: room.id.clone(),
            count,
        });

        if !room.is_synthetic() {
            match self.store.subscribe_messages(&room.id).await {
                Ok(subscription) => {
                    let stale = {
                        let mut guard = self.inner.lock().await;
                        if guard.is_current(generation, &room.id) {
                            let task =
                                self.spawn_subscription_task(subscription.events, generation);
                            guard.subscription = Some(LiveSubscription {
                                handle: subscription.handle,
                                room_id: room.id.clone(),
                                task,
                            });
                            None
                        } else {
                            Some(subscription.handle)
                        }
                    };
                    if let Some(handle) = stale {
                        debug!(room_id = %room.id, "closing subscription of stale switch");
                        if let Err(err) = self.store.unsubscribe(handle).await {
                            warn!(room_id = %room.id, error = %err, "unsubscribe failed");
                        }
                        return Ok(SwitchOutcome::Superseded);
                    }
                }
                Err(err) => {
                    warn!(room_id = %room.id, error = %err, "live updates unavailable");
                    let _ = self.events.send(SessionEvent::Error(format!(
                        "live updates unavailable for {}",
                        room.name
                    )));
                }
            }
        }

        let phase = {
            let mut guard = self.inner.lock().await;
            if !guard.is_current(generation, &room.id) {
                return Ok(SwitchOutcome::Superseded);
            }
            guard.phase = if guard.room_blocked {
                SessionPhase::Blocked
            } else {
                SessionPhase::Active
            };
            guard.phase
        };
        info!(room_id = %room.id, phase = ?phase, "room active");
        self.emit_phase(Some(room.id.clone()), phase);
        Ok(SwitchOutcome::Entered(phase))
    }

    /// Merges a message creation event into the active room. Returns whether
    /// it became visible in the cache; re-deliveries return false.
    pub async fn ingest_live_message(&self, message: Message) -> bool {
        self.ingest(message, None).await
    }

    async fn ingest(&self, message: Message, generation: Option<u64>) -> bool {
        let (inserted, hidden) = {
            let mut guard = self.inner.lock().await;
            if generation.is_some_and(|g| g != guard.generation) {
                return false;
            }
            if guard.active_room.as_ref() != Some(&message.room_id) {
                debug!(
                    message_id = %message.id,
                    room_id = %message.room_id,
                    "dropping event for inactive room"
                );
                return false;
            }
            (guard.cache.insert(message.clone()), guard.room_blocked)
        };
        if inserted && hidden {
            debug!(message_id = %message.id, "cached message from blocked room");
        } else if inserted {
            let _ = self.events.send(SessionEvent::MessageAppended { message });
        }
        inserted
    }

    /// Writes `text` to the active room, then writes the assistant's reply.
    /// Only a failed write of the user's own message is an error.
    pub async fn send_message(&self, text: &str) -> Result<Message, SessionError> {
        let body = text.trim();
        if body.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let (user, room) = {
            let guard = self.inner.lock().await;
            let user = guard.user.clone().ok_or(SessionError::NotSignedIn)?;
            let room = guard.active_room().cloned().ok_or(SessionError::NoActiveRoom)?;
            match guard.phase {
                SessionPhase::Active => {}
                SessionPhase::Blocked => return Err(SessionError::Blocked),
                SessionPhase::Idle | SessionPhase::Switching => {
                    return Err(SessionError::NoActiveRoom)
                }
            }
            (user, room)
        };

        let draft = NewMessage {
            room_id: room.id.clone(),
            body: body.to_owned(),
            kind: MessageKind::User,
            sender_id: user.id.clone(),
            sender: user.sender_meta(),
        };
        let sent = self.write_message(&room, draft).await.map_err(|err| {
            warn!(room_id = %room.id, error = %err, "message send failed");
            SessionError::SendFailed(err)
        })?;
        self.ingest(sent.clone(), None).await;

        let history = {
            let guard = self.inner.lock().await;
            let mut history = if guard.active_room.as_ref() == Some(&room.id) {
                guard.cache.messages().to_vec()
            } else {
                Vec::new()
            };
            if !history.iter().any(|m| m.id == sent.id) {
                history.push(sent.clone());
            }
            history
        };

        let reply = match self.completion.complete(&history).await {
            Ok(text) if text.trim().is_empty() => completion::EMPTY_REPLY_NOTICE.to_owned(),
            Ok(text) => text,
            Err(err) => {
                warn!(room_id = %room.id, error = %err, "completion failed");
                err.user_notice().to_owned()
            }
        };

        let assistant = self.settings.assistant.as_user();
        let reply_draft = NewMessage {
            room_id: room.id.clone(),
            body: reply,
            kind: MessageKind::Assistant,
            sender_id: assistant.id.clone(),
            sender: assistant.sender_meta(),
        };
        match self.write_message(&room, reply_draft).await {
            Ok(stored) => {
                self.ingest(stored, None).await;
            }
            Err(err) => {
                warn!(room_id = %room.id, error = %err, "assistant reply was not stored");
                let _ = self
                    .events
                    .send(SessionEvent::Error(REPLY_NOT_SAVED_NOTICE.to_owned()));
                self.ingest(system_message(&room.id, REPLY_NOT_SAVED_NOTICE), None)
                    .await;
            }
        }

        Ok(sent)
    }

    /// Synthetic rooms never reach the store.
    async fn write_message(
        &self,
        room: &Room,
        draft: NewMessage,
    ) -> Result<Message, shared::error::StoreError> {
        if room.is_synthetic() {
            return Ok(Message::from_draft(
                draft,
                MessageId::generate_local(),
                Utc::now(),
            ));
        }
        self.store.create_message(draft).await
    }

    /// Blocks or unblocks `counterpart_id`. The subscription is untouched;
    /// only the visibility of a matching active room changes. A room still
    /// switching keeps `Switching` and settles on the new state.
    pub async fn set_blocked(
        &self,
        counterpart_id: &UserId,
        blocked: bool,
    ) -> Result<SessionPhase, SessionError> {
        let self_id = {
            let guard = self.inner.lock().await;
            guard
                .user
                .as_ref()
                .map(|user| user.id.clone())
                .ok_or(SessionError::NotSignedIn)?
        };

        if self.blocks.is_blocked(counterpart_id).await != blocked {
            let result = if blocked {
                self.blocks.block(&self_id, counterpart_id).await
            } else {
                self.blocks.unblock(&self_id, counterpart_id).await
            };
            result.map_err(|err| {
                warn!(counterpart_id = %counterpart_id, error = %err, "block list update failed");
                SessionError::Block(err)
            })?;
        }

        let changed = {
            let mut guard = self.inner.lock().await;
            let concerns_active = guard
                .active_room()
                .and_then(|room| room.counterpart(&self_id))
                .is_some_and(|id| id == counterpart_id);
            if concerns_active {
                guard.room_blocked = blocked;
            }
            let next = match guard.phase {
                SessionPhase::Active | SessionPhase::Blocked if concerns_active => {
                    if blocked {
                        SessionPhase::Blocked
                    } else {
                        SessionPhase::Active
                    }
                }
                other => other,
            };
            let changed = next != guard.phase;
            guard.phase = next;
            changed.then(|| (guard.active_room.clone(), next))
        };

        match changed {
            Some((room_id, phase)) => {
                self.emit_phase(room_id, phase);
                Ok(phase)
            }
            None => Ok(self.phase().await),
        }
    }

    /// Finds or creates the private room with `other_id` and switches to it.
    pub async fn open_direct_message(
        self: &Arc<Self>,
        other_id: &UserId,
    ) -> Result<RoomId, SessionError> {
        let (self_id, other, allow) = {
            let guard = self.inner.lock().await;
            let self_id = guard
                .user
                .as_ref()
                .map(|user| user.id.clone())
                .ok_or(SessionError::NotSignedIn)?;
            let other = guard
                .roster
                .get(other_id)
                .cloned()
                .ok_or_else(|| SessionError::UnknownUser(other_id.to_string()))?;
            (self_id, other, guard.allow_direct_messages)
        };

        let resolution = self.dm_resolver.resolve(&self_id, &other, allow).await?;
        let room = resolution.into_room();
        let inserted = self.inner.lock().await.directory.add_room(room.clone());
        if inserted {
            let _ = self.events.send(SessionEvent::RoomAdded { room: room.clone() });
        }

        self.switch_room(&room.id).await?;
        Ok(room.id)
    }

    pub async fn set_direct_messages_allowed(&self, allowed: bool) {
        self.inner.lock().await.allow_direct_messages = allowed;
    }

    pub async fn view(&self) -> SessionView {
        let guard = self.inner.lock().await;
        let blocked = guard.room_blocked;
        SessionView {
            room: guard.active_room().cloned(),
            phase: guard.phase,
            blocked,
            messages: if blocked {
                Vec::new()
            } else {
                guard.cache.messages().to_vec()
            },
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.lock().await.phase
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.inner.lock().await.directory.rooms().to_vec()
    }

    pub async fn users(&self) -> Vec<User> {
        self.inner.lock().await.roster.users().to_vec()
    }

    pub async fn is_demo_mode(&self) -> bool {
        self.inner.lock().await.directory.is_demo_mode()
    }

    /// Everything cached for the active room, including messages hidden by
    /// a block.
    pub async fn cached_messages(&self) -> Vec<Message> {
        self.inner.lock().await.cache.messages().to_vec()
    }

    pub async fn live_subscription_room(&self) -> Option<RoomId> {
        self.inner
            .lock()
            .await
            .subscription
            .as_ref()
            .map(|s| s.room_id.clone())
    }

    fn spawn_subscription_task(
        self: &Arc<Self>,
        mut events: BoxStream<'static, Message>,
        generation: u64,
    ) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(message) = events.next().await {
                let Some(strong) = manager.upgrade() else {
                    break;
                };
                strong.ingest(message, Some(generation)).await;
            }
        })
    }

    async fn close_subscription(&self, subscription: LiveSubscription) {
        subscription.task.abort();
        if let Err(err) = self.store.unsubscribe(subscription.handle).await {
            warn!(
                room_id = %subscription.room_id,
                error = %err,
                "unsubscribe failed"
            );
        }
    }

    fn emit_phase(&self, room_id: Option<RoomId>, phase: SessionPhase) {
        let _ = self
            .events
            .send(SessionEvent::PhaseChanged { room_id, phase });
    }
}

fn system_message(room_id: &RoomId, body: &str) -> Message {
    Message {
        id: MessageId::generate_local(),
        room_id: room_id.clone(),
        sender_id: UserId::from(SYSTEM_SENDER_ID),
        sender_name: SYSTEM_SENDER_NAME.to_owned(),
        sender_avatar: None,
        body: body.to_owned(),
        kind: MessageKind::System,
        created_at: Utc::now(),
        color: None,
    }
}

fn welcome_message(room: &Room) -> Message {
    system_message(
        &room.id,
        &format!(
            "{} odasına hoş geldiniz! Sunucuya şu an ulaşılamıyor; mesajlar yalnızca bu cihazda tutulur.",
            room.name
        ),
    )
}

#[cfg(test)]
#[path = "tests/fakes.rs"]
mod fakes;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
