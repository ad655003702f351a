//! Unified error type for the Atrium server.

use atrium_media::MediaError;
use atrium_protocol::ProtocolError;
use atrium_room::RoomError;
use atrium_session::SessionError;
use atrium_transport::TransportError;

/// Top-level error wrapping all layer-specific errors.
///
/// The `#[from]` attribute on each variant generates `From` impls, so
/// `?` converts layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum AtriumError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),
}
