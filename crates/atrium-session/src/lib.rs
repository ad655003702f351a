//! Identity and equipment for Atrium peers.
//!
//! A peer arrives with an optional bearer token. The [`Authenticator`]
//! turns it into a durable [`UserId`](atrium_protocol::UserId); peers
//! without a resolvable identity stay in the room as guests. Either way
//! the room keeps a live [`EquipmentLedger`] entry for the peer, and on
//! departure the identified entries are flushed to an [`EquipmentStore`].

#![allow(async_fn_in_trait)]

mod auth;
mod equipment;
mod error;
mod store;

pub use auth::{Authenticator, StaticAuthenticator};
pub use equipment::{unix_millis, EquipmentLedger, UserEquipment};
pub use error::SessionError;
pub use store::{EquipmentStore, MemoryStore};
