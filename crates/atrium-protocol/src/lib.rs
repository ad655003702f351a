//! Signaling wire protocol for Atrium.
//!
//! This crate defines everything that travels over a peer's signaling
//! channel:
//!
//! - **Identifiers** ([`RoomId`], [`PeerId`], engine-assigned handles):
//!   newtype wrappers used throughout the workspace.
//! - **Messages** ([`Request`], [`ServerMessage`], [`Notification`]):
//!   the request/response + notification surface that drives room and
//!   media setup.
//! - **App data** ([`AppData`]): the closed set of application payloads
//!   multiplexed over data channels, decoded once at the channel boundary.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): byte-level conversion.
//!
//! The protocol layer knows nothing about connections, rooms, or the
//! media engine; it only defines shapes and how to (de)serialize them.

mod appdata;
mod codec;
mod error;
mod ids;
mod message;

pub use appdata::AppData;
pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use ids::{
    ConsumerId, DataConsumerId, DataProducerId, EggId, PeerId, ProducerId,
    RoomId, TransportId, UserId,
};
pub use message::{
    codes, ClientRequest, EggSummary, ErrorBody, JoinResponse, MapKind,
    MediaKind, Notification, PeerSummary, ProducerSummary, Request,
    Response, ResponseBody, RoomOptions, ServerMessage, TransportDirection,
};
