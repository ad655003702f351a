//! # Atrium
//!
//! Session orchestration for real-time media rooms. Atrium owns room
//! and participant lifecycle, the signaling protocol, and the
//! bookkeeping around an external media-routing engine; the engine
//! itself is driven through the [`MediaEngine`](atrium_media::MediaEngine)
//! trait.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use atrium::prelude::*;
//!
//! # async fn run() -> Result<(), AtriumError> {
//! let server = AtriumServer::<LoopbackEngine, MemoryStore, StaticAuthenticator, JsonCodec>::builder()
//!     .bind("0.0.0.0:9000")
//!     .build(LoopbackEngine::new(), MemoryStore::new(), StaticAuthenticator::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod http;
mod server;

pub use error::AtriumError;
pub use server::{AtriumServer, AtriumServerBuilder};

/// Convenience re-exports for embedding the server.
pub mod prelude {
    pub use crate::{AtriumError, AtriumServer, AtriumServerBuilder};
    pub use atrium_media::{LoopbackEngine, MediaEngine};
    pub use atrium_protocol::{
        codes, ClientRequest, Codec, EggId, JsonCodec, MapKind, MediaKind,
        Notification, PeerId, Request, Response, ResponseBody, RoomId,
        RoomOptions, ServerMessage, TransportDirection,
    };
    pub use atrium_room::{RoomRegistry, RoomSummary};
    pub use atrium_session::{
        Authenticator, EquipmentStore, MemoryStore, SessionError,
        StaticAuthenticator, UserEquipment,
    };
    pub use atrium_transport::{ConnectionId, SignalChannel};
}
