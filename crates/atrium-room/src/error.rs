use atrium_protocol::{PeerId, RoomId};

/// Errors from room and peer lifecycle operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("peer {peer} not found in room {room}")]
    PeerNotFound { room: RoomId, peer: PeerId },
}
