//! Application payloads multiplexed over a peer's data channel.
//!
//! The data channel carries several independent sub-protocols (chat,
//! avatar pose, door state, projectiles, directed notices) over one
//! stream. [`AppData`] is the closed sum type they all decode into,
//! decoded exactly once at the channel boundary and then dispatched by
//! variant. Unknown kinds fail decoding rather than passing through.

use serde::{Deserialize, Serialize};

use crate::{PeerId, ProtocolError};

/// One application payload, tagged by `kind` on the wire.
///
/// Every variant carries the sending peer and a client timestamp in
/// milliseconds; the orchestrator forwards these fields untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AppData {
    /// Free-text chat line.
    Chat {
        sender_peer_id: PeerId,
        timestamp: u64,
        text: String,
    },

    /// Avatar pose sample. Position is metres, rotation a quaternion.
    PoseUpdate {
        sender_peer_id: PeerId,
        timestamp: u64,
        position: [f32; 3],
        rotation: [f32; 4],
        animation_state: String,
    },

    /// A door opened or closed; `linked_door_id` pairs double doors.
    DoorState {
        sender_peer_id: PeerId,
        timestamp: u64,
        door_id: String,
        #[serde(default)]
        linked_door_id: Option<String>,
        open: bool,
    },

    /// A projectile launched from `position` with initial `velocity`.
    ProjectileLaunch {
        sender_peer_id: PeerId,
        timestamp: u64,
        position: [f32; 3],
        velocity: [f32; 3],
    },

    /// Text addressed to one peer. Receivers must drop notices whose
    /// target is not their own peer id; see [`AppData::is_addressed_to`].
    DirectedNotice {
        sender_peer_id: PeerId,
        timestamp: u64,
        target_peer_id: PeerId,
        text: String,
    },
}

impl AppData {
    /// The peer that sent this payload.
    pub fn sender(&self) -> PeerId {
        match self {
            Self::Chat { sender_peer_id, .. }
            | Self::PoseUpdate { sender_peer_id, .. }
            | Self::DoorState { sender_peer_id, .. }
            | Self::ProjectileLaunch { sender_peer_id, .. }
            | Self::DirectedNotice { sender_peer_id, .. } => *sender_peer_id,
        }
    }

    /// Client timestamp in milliseconds.
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Chat { timestamp, .. }
            | Self::PoseUpdate { timestamp, .. }
            | Self::DoorState { timestamp, .. }
            | Self::ProjectileLaunch { timestamp, .. }
            | Self::DirectedNotice { timestamp, .. } => *timestamp,
        }
    }

    /// Whether `me` should process this payload.
    ///
    /// Broadcast variants are for everyone; a `DirectedNotice` only for
    /// its target.
    pub fn is_addressed_to(&self, me: PeerId) -> bool {
        match self {
            Self::DirectedNotice { target_peer_id, .. } => {
                *target_peer_id == me
            }
            _ => true,
        }
    }

    /// Decodes one payload from raw channel bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_json_shape() {
        let payload = AppData::Chat {
            sender_peer_id: PeerId(3),
            timestamp: 1000,
            text: "hello".into(),
        };
        let json: serde_json::Value =
            serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "Chat");
        assert_eq!(json["sender_peer_id"], 3);
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn test_pose_update_round_trip() {
        let payload = AppData::PoseUpdate {
            sender_peer_id: PeerId(1),
            timestamp: 5,
            position: [0.5, 1.6, -3.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            animation_state: "walk".into(),
        };
        let bytes = serde_json::to_vec(&payload).unwrap();
        assert_eq!(AppData::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_door_state_linked_door_optional() {
        let json = r#"{
            "kind": "DoorState",
            "sender_peer_id": 2,
            "timestamp": 9,
            "door_id": "cellar",
            "open": true
        }"#;
        let payload = AppData::decode(json.as_bytes()).unwrap();
        match payload {
            AppData::DoorState {
                linked_door_id,
                open,
                ..
            } => {
                assert!(linked_door_id.is_none());
                assert!(open);
            }
            other => panic!("expected DoorState, got {other:?}"),
        }
    }

    #[test]
    fn test_directed_notice_addressing() {
        let notice = AppData::DirectedNotice {
            sender_peer_id: PeerId(1),
            timestamp: 0,
            target_peer_id: PeerId(7),
            text: "psst".into(),
        };
        assert!(notice.is_addressed_to(PeerId(7)));
        assert!(!notice.is_addressed_to(PeerId(8)));

        // Broadcast payloads are addressed to everyone.
        let chat = AppData::Chat {
            sender_peer_id: PeerId(1),
            timestamp: 0,
            text: "hi".into(),
        };
        assert!(chat.is_addressed_to(PeerId(99)));
    }

    #[test]
    fn test_sender_and_timestamp_accessors() {
        let payload = AppData::ProjectileLaunch {
            sender_peer_id: PeerId(4),
            timestamp: 77,
            position: [0.0; 3],
            velocity: [1.0, 2.0, 3.0],
        };
        assert_eq!(payload.sender(), PeerId(4));
        assert_eq!(payload.timestamp(), 77);
    }

    #[test]
    fn test_unknown_kind_fails_decode() {
        let json = r#"{"kind": "Fireworks", "sender_peer_id": 1, "timestamp": 0}"#;
        assert!(AppData::decode(json.as_bytes()).is_err());
    }
}
