use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, MessageKind, RoomId, RoomKind, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub is_automated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl User {
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar: None,
            is_online: false,
            is_automated: false,
            color: None,
        }
    }

    pub fn sender_meta(&self) -> SenderMeta {
        SenderMeta {
            display_name: self.display_name.clone(),
            avatar: self.avatar.clone(),
            color: self.color.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    #[serde(default)]
    pub topic: String,
    pub kind: RoomKind,
    /// Exactly two ids for private rooms. Not authoritative for public ones.
    #[serde(default)]
    pub participants: Vec<UserId>,
}

impl Room {
    pub fn is_synthetic(&self) -> bool {
        self.kind == RoomKind::Synthetic
    }

    /// The other party of a two-party room, if this is one.
    pub fn counterpart(&self, self_id: &UserId) -> Option<&UserId> {
        if self.kind == RoomKind::Public || self.participants.len() != 2 {
            return None;
        }
        if !self.participants.contains(self_id) {
            return None;
        }
        self.participants.iter().find(|id| *id != self_id)
    }

    pub fn has_exact_participants(&self, a: &UserId, b: &UserId) -> bool {
        self.participants.len() == 2 && self.participants.contains(a) && self.participants.contains(b)
    }
}

/// Sender details captured at write time. Old messages keep the name the
/// sender had when they were written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderMeta {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    pub body: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Message {
    /// Builds a message from a draft once an id and timestamp are assigned.
    pub fn from_draft(draft: NewMessage, id: MessageId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            room_id: draft.room_id,
            sender_id: draft.sender_id,
            sender_name: draft.sender.display_name,
            sender_avatar: draft.sender.avatar,
            body: draft.body,
            kind: draft.kind,
            created_at,
            color: draft.sender.color,
        }
    }
}

/// A message as submitted for writing, before the store assigns id and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub body: String,
    pub kind: MessageKind,
    pub sender_id: UserId,
    pub sender: SenderMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dm(a: &str, b: &str) -> Room {
        Room {
            id: RoomId::from("r-dm"),
            name: "dm".into(),
            topic: String::new(),
            kind: RoomKind::Private,
            participants: vec![UserId::from(a), UserId::from(b)],
        }
    }

    #[test]
    fn counterpart_is_the_other_participant() {
        let room = dm("alice", "bob");
        assert_eq!(room.counterpart(&"alice".into()), Some(&UserId::from("bob")));
        assert_eq!(room.counterpart(&"bob".into()), Some(&UserId::from("alice")));
        assert_eq!(room.counterpart(&"carol".into()), None);
    }

    #[test]
    fn public_rooms_have_no_counterpart() {
        let mut room = dm("alice", "bob");
        room.kind = RoomKind::Public;
        assert_eq!(room.counterpart(&"alice".into()), None);
    }

    #[test]
    fn sender_meta_snapshots_display_fields() {
        let mut user = User::new("alice", "Alice");
        user.color = Some("bg-gray-200 text-gray-600".into());
        let meta = user.sender_meta();
        assert_eq!(meta.display_name, "Alice");
        assert_eq!(meta.color.as_deref(), Some("bg-gray-200 text-gray-600"));
    }

    #[test]
    fn exact_participants_ignores_order() {
        let room = dm("alice", "bob");
        assert!(room.has_exact_participants(&"bob".into(), &"alice".into()));
        assert!(!room.has_exact_participants(&"bob".into(), &"carol".into()));
    }
}
