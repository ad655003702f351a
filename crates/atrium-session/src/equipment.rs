//! The in-room equipment ledger.
//!
//! Each room keeps one live entry per present peer. Entries for
//! identified users are flushed to the store when the peer departs (and
//! when the room is deleted); guest entries live and die with the room.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use atrium_protocol::{PeerId, UserId};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One peer's persisted equipment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEquipment {
    /// `None` for guests; such entries are never persisted.
    pub user_id: Option<UserId>,
    pub display_name: String,
    pub egg_count: u32,
    pub last_updated_ms: u64,
}

impl UserEquipment {
    pub fn guest(display_name: impl Into<String>) -> Self {
        Self {
            user_id: None,
            display_name: display_name.into(),
            egg_count: 0,
            last_updated_ms: unix_millis(),
        }
    }

    pub fn identified(
        user_id: UserId,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id),
            display_name: display_name.into(),
            egg_count: 0,
            last_updated_ms: unix_millis(),
        }
    }
}

/// Live equipment entries for the peers currently in one room.
#[derive(Debug, Default)]
pub struct EquipmentLedger {
    entries: HashMap<PeerId, UserEquipment>,
}

impl EquipmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: PeerId, entry: UserEquipment) {
        self.entries.insert(peer, entry);
    }

    pub fn get(&self, peer: PeerId) -> Option<&UserEquipment> {
        self.entries.get(&peer)
    }

    /// Adjusts a peer's egg count by `delta`, saturating at zero on both
    /// ends. Returns the new count, or `None` if the peer has no entry.
    pub fn adjust_eggs(&mut self, peer: PeerId, delta: i64) -> Option<u32> {
        let entry = self.entries.get_mut(&peer)?;
        let adjusted = i64::from(entry.egg_count) + delta;
        entry.egg_count = adjusted.clamp(0, i64::from(u32::MAX)) as u32;
        entry.last_updated_ms = unix_millis();
        Some(entry.egg_count)
    }

    /// Removes a peer's entry, returning it if the peer was identified.
    /// Guest entries are discarded here: nothing about them persists.
    pub fn take_for_flush(&mut self, peer: PeerId) -> Option<UserEquipment> {
        let entry = self.entries.remove(&peer)?;
        if entry.user_id.is_some() {
            Some(entry)
        } else {
            None
        }
    }

    /// Drains every identified entry, for flushing at room deletion.
    pub fn drain_for_flush(&mut self) -> Vec<UserEquipment> {
        self.entries
            .drain()
            .filter_map(|(_, entry)| {
                entry.user_id.is_some().then_some(entry)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_eggs_saturates_at_zero() {
        let mut ledger = EquipmentLedger::new();
        let peer = PeerId(1);
        ledger.insert(peer, UserEquipment::guest("gia"));

        assert_eq!(ledger.adjust_eggs(peer, 2), Some(2));
        assert_eq!(ledger.adjust_eggs(peer, -5), Some(0));
    }

    #[test]
    fn test_adjust_eggs_unknown_peer_is_none() {
        let mut ledger = EquipmentLedger::new();
        assert_eq!(ledger.adjust_eggs(PeerId(9), 1), None);
    }

    #[test]
    fn test_take_for_flush_discards_guest_entries() {
        let mut ledger = EquipmentLedger::new();
        ledger.insert(PeerId(1), UserEquipment::guest("guest"));
        ledger.insert(
            PeerId(2),
            UserEquipment::identified(UserId("alice".into()), "alice"),
        );

        assert!(ledger.take_for_flush(PeerId(1)).is_none());
        let flushed = ledger.take_for_flush(PeerId(2)).unwrap();
        assert_eq!(flushed.user_id, Some(UserId("alice".into())));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_drain_for_flush_keeps_only_identified() {
        let mut ledger = EquipmentLedger::new();
        ledger.insert(PeerId(1), UserEquipment::guest("guest"));
        ledger.insert(
            PeerId(2),
            UserEquipment::identified(UserId("alice".into()), "alice"),
        );
        ledger.insert(
            PeerId(3),
            UserEquipment::identified(UserId("bob".into()), "bob"),
        );

        let flushed = ledger.drain_for_flush();
        assert_eq!(flushed.len(), 2);
        assert!(ledger.is_empty());
    }
}
