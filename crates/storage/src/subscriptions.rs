use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use futures::stream::BoxStream;
use futures::StreamExt;
use shared::{domain::RoomId, protocol::Message};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

/// A live, room-keyed stream of message creation events.
///
/// `events` ends once the handle is unsubscribed.
pub struct MessageSubscription {
    pub handle: SubscriptionHandle,
    pub room_id: RoomId,
    pub events: BoxStream<'static, Message>,
}

impl fmt::Debug for MessageSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSubscription")
            .field("handle", &self.handle)
            .field("room_id", &self.room_id)
            .finish_non_exhaustive()
    }
}

struct Subscriber {
    room_id: RoomId,
    tx: mpsc::UnboundedSender<Message>,
}

/// Fan-out of created messages to the subscribers of the matching room.
#[derive(Default)]
pub struct SubscriptionHub {
    next_handle: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionHandle, Subscriber>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, room_id: &RoomId) -> MessageSubscription {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.insert(
            handle,
            Subscriber {
                room_id: room_id.clone(),
                tx,
            },
        );
        debug!(handle = handle.0, room_id = %room_id, "subscription opened");
        MessageSubscription {
            handle,
            room_id: room_id.clone(),
            events: UnboundedReceiverStream::new(rx).boxed(),
        }
    }

    /// Returns false when the handle was not live.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.subscribers.lock().await.remove(&handle).is_some();
        if removed {
            debug!(handle = handle.0, "subscription closed");
        }
        removed
    }

    /// Delivers `message` to every subscriber of its room. Returns the
    /// number of deliveries.
    pub async fn publish(&self, message: &Message) -> usize {
        let mut guard = self.subscribers.lock().await;
        let mut delivered = 0;
        guard.retain(|_, subscriber| {
            if subscriber.room_id != message.room_id {
                return true;
            }
            if subscriber.tx.send(message.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }

    pub async fn live_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    pub async fn live_rooms(&self) -> Vec<RoomId> {
        let guard = self.subscribers.lock().await;
        let mut rooms: Vec<RoomId> = guard.values().map(|s| s.room_id.clone()).collect();
        rooms.sort();
        rooms
    }
}
