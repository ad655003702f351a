//! Identifier newtypes shared across the workspace.
//!
//! Numeric ids are allocated by the orchestrator; string ids are assigned
//! by the external media engine and treated as opaque tokens. All of them
//! serialize `#[serde(transparent)]` so the wire carries the bare value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A process-unique room identifier.
///
/// Allocated from a counter that only moves forward: a room that is
/// deleted and later re-created by name gets a fresh id, never the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// A peer identifier, unique **within its owning room only**.
///
/// Cross-room lookups must always pair this with a [`RoomId`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// An egg within a room's fixed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EggId(pub u32);

impl fmt::Display for EggId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E-{}", self.0)
    }
}

/// Durable user identity resolved by the authenticator.
///
/// Unlike [`PeerId`], this survives across sessions; the equipment store
/// is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! engine_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

engine_id!(
    /// Engine-assigned transport identifier.
    TransportId
);
engine_id!(
    /// Engine-assigned media producer identifier.
    ProducerId
);
engine_id!(
    /// Engine-assigned media consumer identifier.
    ConsumerId
);
engine_id!(
    /// Engine-assigned data producer identifier.
    DataProducerId
);
engine_id!(
    /// Engine-assigned data consumer identifier.
    DataConsumerId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&RoomId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_peer_id_display() {
        assert_eq!(PeerId(7).to_string(), "P-7");
        assert_eq!(RoomId(3).to_string(), "R-3");
        assert_eq!(EggId(11).to_string(), "E-11");
    }

    #[test]
    fn test_engine_id_serializes_as_plain_string() {
        let id = ProducerId("a1b2c3".into());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"a1b2c3\"");
        let back: ProducerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_user_id_round_trip() {
        let id = UserId("user-9000".into());
        let json = serde_json::to_string(&id).unwrap();
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
