//! Request/response and notification types for the signaling surface.
//!
//! A client sends [`Request`] frames (a correlation id plus a
//! [`ClientRequest`] body). The server answers each request with a
//! [`Response`] carrying the same id, and pushes unsolicited
//! [`Notification`]s, both wrapped in [`ServerMessage`] so a client can
//! tell them apart with one tag check.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{
    ConsumerId, DataConsumerId, DataProducerId, EggId, PeerId, ProducerId,
    RoomId, TransportId,
};

// ---------------------------------------------------------------------------
// Enumerations shared by requests and bookkeeping
// ---------------------------------------------------------------------------

/// Direction of a media transport relative to the peer that owns it.
///
/// At most one live transport exists per (peer, direction) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    /// Carries the peer's outbound producers.
    Producing,
    /// Carries the peer's inbound consumers.
    Consuming,
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producing => write!(f, "producing"),
            Self::Consuming => write!(f, "consuming"),
        }
    }
}

/// Kind of a media producer/consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Which map a room runs. The garden map enables the egg broadcaster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum MapKind {
    #[default]
    Lobby,
    Garden,
}

impl MapKind {
    /// Whether rooms on this map run the periodic egg mini-game.
    pub fn eggs_enabled(&self) -> bool {
        matches!(self, Self::Garden)
    }
}

/// Client-supplied room settings, honored only for the creating peer.
///
/// Guests joining an existing room may still send this; it is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomOptions {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub max_occupancy: usize,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub voice_enabled: bool,
    #[serde(default = "default_true")]
    pub text_enabled: bool,
    #[serde(default)]
    pub map_kind: MapKind,
}

fn default_true() -> bool {
    true
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            max_occupancy: 8,
            is_private: false,
            password: None,
            voice_enabled: true,
            text_enabled: true,
            map_kind: MapKind::Lobby,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A single client request frame: correlation id + body.
///
/// The server echoes `id` in the matching [`Response`] so the client can
/// resolve its pending callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub body: ClientRequest,
}

/// Every operation a peer can request over its signaling channel.
///
/// `#[serde(tag = "type")]` produces internally tagged JSON:
/// `{ "type": "Join", "display_name": "ana", ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// Join an existing room, or create one when `room_id` is absent or
    /// unknown (the caller becomes host). With `strict: true` an
    /// unresolvable `room_id` is a terminal NotFound error instead,
    /// used when rejoining by invitation code.
    Join {
        room_id: Option<RoomId>,
        config: Option<RoomOptions>,
        model_handle: String,
        display_name: String,
        /// Optional auth token, resolved opportunistically to a durable
        /// identity. Absent or invalid tokens degrade to a guest join.
        token: Option<String>,
        #[serde(default)]
        strict: bool,
    },

    /// Leave the room. The same teardown runs on abrupt disconnect.
    Leave { room_id: RoomId, peer_id: PeerId },

    /// Fetch the engine's capability description (allowed before Join).
    GetCapabilities,

    /// Allocate the peer's transport for one direction.
    CreateTransport {
        room_id: RoomId,
        peer_id: PeerId,
        direction: TransportDirection,
    },

    /// One-shot DTLS-style handshake for a previously created transport.
    ConnectTransport {
        room_id: RoomId,
        peer_id: PeerId,
        transport_id: TransportId,
        remote_dtls: Value,
        direction: TransportDirection,
    },

    /// Register a media producer on the producing transport.
    Produce {
        room_id: RoomId,
        peer_id: PeerId,
        kind: MediaKind,
        media_parameters: Value,
    },

    /// Register a data producer on the producing transport.
    ProduceData {
        room_id: RoomId,
        peer_id: PeerId,
        label: String,
        protocol: String,
        stream_parameters: Value,
    },

    /// Consume another peer's producer. The consumer is created paused;
    /// media flows only after [`ClientRequest::ResumeConsumer`].
    Consume {
        room_id: RoomId,
        peer_id: PeerId,
        producer_id: ProducerId,
        capabilities: Value,
    },

    /// Consume another peer's data producer (no pause/resume phase).
    ConsumeData {
        room_id: RoomId,
        peer_id: PeerId,
        data_producer_id: DataProducerId,
    },

    /// Second phase of the consume handshake: start media flow.
    ResumeConsumer { consumer_id: ConsumerId },

    CloseProducer {
        room_id: RoomId,
        peer_id: PeerId,
        producer_id: ProducerId,
    },

    CloseDataProducer {
        room_id: RoomId,
        peer_id: PeerId,
        data_producer_id: DataProducerId,
    },

    /// List producers visible to this peer (everyone else's).
    ListProducers { room_id: RoomId, peer_id: PeerId },

    /// Claim a marked egg. Acked `cleared: false` when the egg is unknown
    /// or already unmarked; the loser of a clear race sees `false`.
    ClearEgg {
        room_id: RoomId,
        egg_id: EggId,
        peer_id: PeerId,
    },
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Error codes carried in [`ErrorBody`], HTTP-style.
pub mod codes {
    /// Malformed or out-of-state request.
    pub const BAD_REQUEST: u16 = 400;
    /// Unknown room/peer/producer/consumer/egg.
    pub const NOT_FOUND: u16 = 404;
    /// The operation conflicts with existing state.
    pub const CONFLICT: u16 = 409;
    /// Consume rejected: capabilities incompatible with the producer.
    pub const CAPABILITY: u16 = 422;
    /// The media engine or persistent store failed; details stay in logs.
    pub const UPSTREAM: u16 = 500;
}

/// The error half of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

/// Roster entry included in join responses and listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub peer_id: PeerId,
    pub display_name: String,
    pub model_handle: String,
}

/// Producer entry returned by `ListProducers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerSummary {
    pub id: ProducerId,
    pub owner_peer_id: PeerId,
    pub kind: MediaKind,
}

/// An egg announced by the broadcaster (position included so clients can
/// render it; `marked` state is implicit, only marked eggs are sent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EggSummary {
    pub id: EggId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Payload of a successful join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub room_id: RoomId,
    pub peer_id: PeerId,
    /// Snapshot of peers already in the room (excluding the joiner).
    pub peers: Vec<PeerSummary>,
    pub config: RoomOptions,
    pub host_peer_id: PeerId,
    pub model_handle: String,
}

/// The success half of a response, tagged per operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseBody {
    Joined(JoinResponse),
    /// Generic acknowledgement (leave, closes).
    Ack,
    Capabilities {
        capabilities: Value,
    },
    TransportCreated {
        transport_id: TransportId,
        ice_info: Value,
        dtls_info: Value,
        sctp_info: Value,
    },
    TransportConnected {
        connected: bool,
    },
    Produced {
        producer_id: ProducerId,
    },
    DataProduced {
        data_producer_id: DataProducerId,
        label: String,
        protocol: String,
        stream_id: u16,
    },
    Consumed {
        consumer_id: ConsumerId,
        kind: MediaKind,
        media_parameters: Value,
    },
    DataConsumed {
        data_consumer_id: DataConsumerId,
        label: String,
        protocol: String,
        stream_id: u16,
    },
    Resumed {
        resumed: bool,
    },
    Producers {
        producers: Vec<ProducerSummary>,
    },
    EggCleared {
        cleared: bool,
    },
}

/// A reply to one [`Request`], success or error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<ResponseBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Builds a success response.
    pub fn ok(id: u64, body: ResponseBody) -> Self {
        Self {
            id,
            ok: Some(body),
            error: None,
        }
    }

    /// Builds an error response.
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Fire-and-forget multicast pushed to a room's current peer set.
///
/// A peer that joins mid-broadcast does not receive the in-flight
/// notification; it converges from the snapshot in its join response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    PeerJoined {
        room_id: RoomId,
        peer_id: PeerId,
        display_name: String,
        model_handle: String,
    },
    PeerLeft {
        room_id: RoomId,
        peer_id: PeerId,
    },
    NewProducer {
        room_id: RoomId,
        peer_id: PeerId,
        producer_id: ProducerId,
        kind: MediaKind,
    },
    NewDataProducer {
        room_id: RoomId,
        peer_id: PeerId,
        data_producer_id: DataProducerId,
        label: String,
        protocol: String,
    },
    ProducerClosed {
        room_id: RoomId,
        peer_id: PeerId,
        producer_id: ProducerId,
    },
    DataProducerClosed {
        room_id: RoomId,
        peer_id: PeerId,
        data_producer_id: DataProducerId,
    },
    EggBroadcast {
        room_id: RoomId,
        eggs: Vec<EggSummary>,
        count: usize,
        remaining_unmarked: usize,
    },
    EggCleared {
        room_id: RoomId,
        egg_id: EggId,
        cleared_by: PeerId,
        remaining_unmarked: usize,
    },
}

/// Every frame the server can push to a client.
///
/// Adjacently tagged so a client checks one discriminator to decide
/// between resolving a pending request and handling an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    Response(Response),
    Notification(Notification),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The wire shapes here are what the client SDK parses; these tests
    //! pin the JSON produced by the serde attributes.

    use super::*;

    #[test]
    fn test_join_request_json_shape() {
        let req = Request {
            id: 1,
            body: ClientRequest::Join {
                room_id: None,
                config: Some(RoomOptions {
                    name: "den".into(),
                    max_occupancy: 4,
                    ..RoomOptions::default()
                }),
                model_handle: "fox".into(),
                display_name: "ana".into(),
                token: None,
                strict: false,
            },
        };
        let json: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["body"]["type"], "Join");
        assert_eq!(json["body"]["display_name"], "ana");
        assert!(json["body"]["room_id"].is_null());
    }

    #[test]
    fn test_join_strict_defaults_to_false() {
        let json = r#"{
            "id": 3,
            "body": {
                "type": "Join",
                "room_id": 9,
                "config": null,
                "model_handle": "owl",
                "display_name": "bo",
                "token": null
            }
        }"#;
        let req: Request = serde_json::from_str(json).unwrap();
        match req.body {
            ClientRequest::Join { strict, room_id, .. } => {
                assert!(!strict);
                assert_eq!(room_id, Some(RoomId(9)));
            }
            other => panic!("expected Join, got {other:?}"),
        }
    }

    #[test]
    fn test_transport_direction_serializes_lowercase() {
        let json =
            serde_json::to_string(&TransportDirection::Producing).unwrap();
        assert_eq!(json, "\"producing\"");
        let json = serde_json::to_string(&MediaKind::Audio).unwrap();
        assert_eq!(json, "\"audio\"");
    }

    #[test]
    fn test_response_ok_omits_error_field() {
        let resp = Response::ok(7, ResponseBody::Ack);
        let json: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["ok"]["type"], "Ack");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_response_error_omits_ok_field() {
        let resp = Response::error(8, codes::NOT_FOUND, "room R-9 not found");
        let json: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], 404);
        assert!(json.get("ok").is_none());
    }

    #[test]
    fn test_server_message_notification_json_shape() {
        let msg = ServerMessage::Notification(Notification::PeerLeft {
            room_id: RoomId(2),
            peer_id: PeerId(5),
        });
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "Notification");
        assert_eq!(json["data"]["type"], "PeerLeft");
        assert_eq!(json["data"]["peer_id"], 5);
    }

    #[test]
    fn test_consume_request_round_trip() {
        let req = Request {
            id: 42,
            body: ClientRequest::Consume {
                room_id: RoomId(1),
                peer_id: PeerId(2),
                producer_id: ProducerId("beef".into()),
                capabilities: serde_json::json!({"kinds": ["audio"]}),
            },
        };
        let bytes = serde_json::to_vec(&req).unwrap();
        let back: Request = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_egg_broadcast_notification_round_trip() {
        let note = Notification::EggBroadcast {
            room_id: RoomId(4),
            eggs: vec![EggSummary {
                id: EggId(3),
                x: 1.0,
                y: 0.0,
                z: -2.5,
            }],
            count: 1,
            remaining_unmarked: 20,
        };
        let bytes = serde_json::to_vec(&note).unwrap();
        let back: Notification = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, note);
    }

    #[test]
    fn test_map_kind_garden_enables_eggs() {
        assert!(MapKind::Garden.eggs_enabled());
        assert!(!MapKind::Lobby.eggs_enabled());
        assert_eq!(MapKind::default(), MapKind::Lobby);
    }

    #[test]
    fn test_room_options_defaults_fill_missing_fields() {
        let json = r#"{"name": "attic", "max_occupancy": 2}"#;
        let opts: RoomOptions = serde_json::from_str(json).unwrap();
        assert!(opts.voice_enabled);
        assert!(opts.text_enabled);
        assert!(!opts.is_private);
        assert_eq!(opts.map_kind, MapKind::Lobby);
    }

    #[test]
    fn test_decode_unknown_request_type_returns_error() {
        let unknown = r#"{"id": 1, "body": {"type": "Teleport"}}"#;
        let result: Result<Request, _> = serde_json::from_str(unknown);
        assert!(result.is_err());
    }
}
