//! Durable persistence for identified users' equipment.

use std::collections::HashMap;

use atrium_protocol::UserId;
use tokio::sync::Mutex;

use crate::{SessionError, UserEquipment};

/// Backing store for equipment, keyed by durable user id.
///
/// `save` is last-writer-wins; the orchestrator flushes on departure and
/// room deletion, so one user's entry is only ever written from one room
/// at a time.
pub trait EquipmentStore: Send + Sync + 'static {
    fn load(
        &self,
        user: &UserId,
    ) -> impl Future<Output = Result<Option<UserEquipment>, SessionError>> + Send;

    fn save(
        &self,
        entry: &UserEquipment,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// In-memory store for tests and development servers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<UserId, UserEquipment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EquipmentStore for MemoryStore {
    async fn load(
        &self,
        user: &UserId,
    ) -> Result<Option<UserEquipment>, SessionError> {
        Ok(self.entries.lock().await.get(user).cloned())
    }

    async fn save(
        &self,
        entry: &UserEquipment,
    ) -> Result<(), SessionError> {
        let Some(user) = entry.user_id.clone() else {
            // Guests never reach the store; tolerate the call anyway.
            return Ok(());
        };
        tracing::debug!(%user, egg_count = entry.egg_count, "equipment saved");
        self.entries.lock().await.insert(user, entry.clone());
        Ok(())
    }
}
