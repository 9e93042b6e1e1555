use std::{collections::HashSet, sync::Arc};

use shared::{domain::UserId, error::StoreError, protocol::Room};
use storage::RecordStore;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Counterparts the signed-in user has blocked.
///
/// Local state only changes after the store confirms a write.
pub struct BlockRegistry {
    store: Arc<dyn RecordStore>,
    blocked: RwLock<HashSet<UserId>>,
}

impl BlockRegistry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            blocked: RwLock::new(HashSet::new()),
        }
    }

    /// Replaces the local set with the store's. A failed fetch leaves the
    /// set empty: nobody is treated as blocked.
    pub async fn load(&self, self_id: &UserId) -> usize {
        let loaded = match self.store.list_blocks(self_id).await {
            Ok(ids) => ids.into_iter().collect::<HashSet<_>>(),
            Err(err) => {
                warn!(user_id = %self_id, error = %err, "block list unavailable; treating as empty");
                HashSet::new()
            }
        };
        let count = loaded.len();
        *self.blocked.write().await = loaded;
        count
    }

    pub async fn block(&self, self_id: &UserId, other_id: &UserId) -> Result<(), StoreError> {
        self.store.create_block(self_id, other_id).await?;
        self.blocked.write().await.insert(other_id.clone());
        info!(user_id = %self_id, blocked_id = %other_id, "user blocked");
        Ok(())
    }

    pub async fn unblock(&self, self_id: &UserId, other_id: &UserId) -> Result<(), StoreError> {
        self.store.delete_block(self_id, other_id).await?;
        self.blocked.write().await.remove(other_id);
        info!(user_id = %self_id, blocked_id = %other_id, "user unblocked");
        Ok(())
    }

    pub async fn is_blocked(&self, other_id: &UserId) -> bool {
        self.blocked.read().await.contains(other_id)
    }

    /// True when `room` is a two-party room whose other participant is blocked.
    pub async fn blocks_room(&self, room: &Room, self_id: &UserId) -> bool {
        match room.counterpart(self_id) {
            Some(counterpart) => self.is_blocked(counterpart).await,
            None => false,
        }
    }

    pub async fn blocked_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.blocked.read().await.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn clear(&self) {
        self.blocked.write().await.clear();
    }
}
