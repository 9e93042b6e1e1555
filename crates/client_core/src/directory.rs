use shared::{
    domain::{RoomId, RoomKind, UserId},
    protocol::{Room, User},
};
use storage::RecordStore;
use tracing::{info, warn};

pub const DEMO_ROOM_PREFIX: &str = "demo_";

const DEMO_ROOMS: &[(&str, &str, &str)] = &[
    ("general", "Çin ile Ticaret", "İthalat, ihracat ve gümrük"),
    ("tech", "Yazılım Dünyası", "Kodlama, AI ve Teknoloji"),
    ("music", "Müzik Kutusu", "Ne dinliyorsun?"),
    ("game", "Oyun", "Oyun arkadaşı aranıyor"),
];

/// Rooms visible in this session, loaded once per sign-in.
#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    rooms: Vec<Room>,
    demo_mode: bool,
}

impl RoomDirectory {
    pub fn from_rooms(rooms: Vec<Room>) -> Self {
        Self {
            rooms,
            demo_mode: false,
        }
    }

    pub fn demo() -> Self {
        Self {
            rooms: demo_rooms(),
            demo_mode: true,
        }
    }

    /// Public rooms from the store, or the demo set when the store fails or
    /// has nothing usable.
    pub async fn load(store: &dyn RecordStore) -> Self {
        match store.list_public_rooms().await {
            Ok(rooms) => {
                let total = rooms.len();
                let rooms: Vec<Room> = rooms
                    .into_iter()
                    .filter(|room| room.kind == RoomKind::Public)
                    .collect();
                if rooms.is_empty() {
                    warn!(received = total, "no public rooms available; using demo rooms");
                    return Self::demo();
                }
                info!(count = rooms.len(), "room directory loaded");
                Self::from_rooms(rooms)
            }
            Err(err) => {
                warn!(error = %err, "room directory unavailable; using demo rooms");
                Self::demo()
            }
        }
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn get(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|room| &room.id == id)
    }

    pub fn is_demo_mode(&self) -> bool {
        self.demo_mode
    }

    /// Inserts `room` unless one with the same id exists. Returns whether it
    /// was inserted.
    pub fn add_room(&mut self, room: Room) -> bool {
        if self.get(&room.id).is_some() {
            return false;
        }
        self.rooms.push(room);
        true
    }
}

pub fn demo_rooms() -> Vec<Room> {
    DEMO_ROOMS
        .iter()
        .map(|(slug, name, topic)| Room {
            id: RoomId(format!("{DEMO_ROOM_PREFIX}{slug}")),
            name: (*name).to_owned(),
            topic: (*topic).to_owned(),
            kind: RoomKind::Synthetic,
            participants: Vec::new(),
        })
        .collect()
}

/// Known users, loaded alongside the room directory.
#[derive(Debug, Clone, Default)]
pub struct UserRoster {
    users: Vec<User>,
}

impl UserRoster {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }

    /// Falls back to a roster holding only the signed-in user.
    pub async fn load(store: &dyn RecordStore, signed_in: &User) -> Self {
        match store.list_users().await {
            Ok(users) if !users.is_empty() => Self::new(users),
            Ok(_) => {
                warn!("user list is empty; using placeholder roster");
                Self::new(vec![signed_in.clone()])
            }
            Err(err) => {
                warn!(error = %err, "user list unavailable; using placeholder roster");
                Self::new(vec![signed_in.clone()])
            }
        }
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.users.iter().find(|user| &user.id == id)
    }
}
