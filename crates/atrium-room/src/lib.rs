//! Room and peer lifecycle for Atrium.
//!
//! The [`RoomRegistry`] owns every live [`Room`]; a room owns its
//! [`PeerSession`]s, equipment ledger, media bookkeeping and (on garden
//! maps) an [`EggBroadcaster`] with its periodic task. Registry methods
//! are synchronous and return descriptions of the engine/store work they
//! imply, which callers execute after releasing the lock.

mod config;
mod egg;
mod error;
mod peer;
mod registry;
mod room;

pub use config::RoomConfig;
pub use egg::{
    spawn_broadcast_task, EggBroadcaster, EggEntity, MAX_MARKS_PER_TICK,
    POOL_SIZE, TICK_INTERVAL,
};
pub use error::RoomError;
pub use peer::{NoticeSender, PeerSession};
pub use registry::{
    Departure, JoinArgs, JoinOutcome, RoomRegistry, RoomSummary,
};
pub use room::{PeerRemoval, Room};
