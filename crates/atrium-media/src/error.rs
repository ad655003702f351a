//! Error types for media coordination.

use atrium_protocol::{
    ConsumerId, DataConsumerId, DataProducerId, PeerId, ProducerId,
    TransportId, TransportDirection,
};

/// Errors raised while driving the media engine or its bookkeeping.
///
/// The `*NotFound` variants are safe to surface to the caller verbatim;
/// [`MediaError::Upstream`] must be logged with full context and surfaced
/// only as a generic failure.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("transport {0} not found")]
    TransportNotFound(TransportId),

    #[error("producer {0} not found")]
    ProducerNotFound(ProducerId),

    #[error("data producer {0} not found")]
    DataProducerNotFound(DataProducerId),

    #[error("consumer {0} not found")]
    ConsumerNotFound(ConsumerId),

    #[error("data consumer {0} not found")]
    DataConsumerNotFound(DataConsumerId),

    /// The peer has no live transport for the required direction.
    #[error("peer {0} has no {1} transport")]
    NoTransport(PeerId, TransportDirection),

    /// Consume rejected before any allocation: the requested capabilities
    /// cannot receive this producer.
    #[error("capabilities incompatible with producer {0}")]
    Incompatible(ProducerId),

    /// The external engine failed; details belong in logs, not acks.
    #[error("media engine failure: {0}")]
    Upstream(String),
}
