use std::sync::Arc;

use shared::{
    domain::{RoomId, RoomKind, UserId},
    protocol::{Room, User},
};
use storage::RecordStore;
use tracing::{debug, warn};

use crate::error::DmRejection;

pub const LOCAL_DM_PREFIX: &str = "dm:";
const LOCAL_DM_TOPIC: &str = "Özel Sohbet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmResolution {
    Existing(Room),
    Created(Room),
    /// Store unreachable; a local-only room keyed by the counterpart.
    Fallback(Room),
}

impl DmResolution {
    pub fn into_room(self) -> Room {
        match self {
            DmResolution::Existing(room)
            | DmResolution::Created(room)
            | DmResolution::Fallback(room) => room,
        }
    }
}

/// Finds or creates the private room between two users.
pub struct DmResolver {
    store: Arc<dyn RecordStore>,
}

impl DmResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        self_id: &UserId,
        other: &User,
        allow_direct_messages: bool,
    ) -> Result<DmResolution, DmRejection> {
        if !allow_direct_messages {
            return Err(DmRejection::DirectMessagesDisabled);
        }
        if &other.id == self_id {
            return Err(DmRejection::SelfTarget);
        }
        if other.is_automated {
            return Err(DmRejection::AutomatedTarget);
        }

        match self.store.find_private_room(self_id, &other.id).await {
            Ok(Some(room)) => {
                debug!(room_id = %room.id, other_id = %other.id, "existing private room");
                return Ok(DmResolution::Existing(room));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(other_id = %other.id, error = %err, "private room lookup failed");
            }
        }

        match self.store.create_private_room(self_id, other).await {
            Ok(room) => {
                debug!(room_id = %room.id, other_id = %other.id, "private room created");
                Ok(DmResolution::Created(room))
            }
            Err(err) => {
                warn!(
                    other_id = %other.id,
                    error = %err,
                    "private room creation failed; using local room"
                );
                Ok(DmResolution::Fallback(local_dm_room(self_id, other)))
            }
        }
    }
}

/// Deterministic local room for a counterpart, so retries converge.
pub fn local_dm_room(self_id: &UserId, other: &User) -> Room {
    Room {
        id: RoomId(format!("{LOCAL_DM_PREFIX}{}", other.id)),
        name: other.display_name.clone(),
        topic: LOCAL_DM_TOPIC.to_owned(),
        kind: RoomKind::Synthetic,
        participants: vec![self_id.clone(), other.id.clone()],
    }
}
