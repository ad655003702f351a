//! Media coordination for Atrium.
//!
//! The media-routing engine itself (ICE/DTLS negotiation, RTP forwarding,
//! codec handling) is an external collaborator. This crate owns the seam
//! to it and the orchestrator's view of what it allocated:
//!
//! - [`MediaEngine`]: the trait the external engine is driven through
//! - [`LoopbackEngine`]: in-process implementation for tests/development
//! - [`MediaTables`]: per-room bookkeeping of transports, producers and
//!   consumers, keyed both by engine id and by owner
//! - [`MediaError`]: NotFound / Capability / Upstream taxonomy

#![allow(async_fn_in_trait)]

mod engine;
mod error;
mod loopback;
mod tables;

pub use engine::{
    ConsumerInfo, DataConsumerInfo, DataProducerInfo, MediaEngine,
    TransportInfo,
};
pub use error::MediaError;
pub use loopback::LoopbackEngine;
pub use tables::{
    ConsumerRecord, DataConsumerRecord, DataProducerRecord, MediaTables,
    PeerMediaTeardown, ProducerRecord, TransportRecord,
};
