//! The seam to the external media-routing engine.
//!
//! Everything the orchestrator does not interpret (ICE candidates, DTLS
//! fingerprints, RTP/SCTP parameters, capability descriptions) crosses
//! this boundary as opaque `serde_json::Value`s. The orchestrator only
//! tracks the engine-assigned identifiers.

use atrium_protocol::{
    ConsumerId, DataConsumerId, DataProducerId, MediaKind, ProducerId,
    TransportId, TransportDirection,
};
use serde_json::Value;

use crate::MediaError;

/// Connection parameters for a freshly allocated transport.
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub id: TransportId,
    pub ice_info: Value,
    pub dtls_info: Value,
    pub sctp_info: Value,
}

/// A consumer allocated by the engine. Always created paused; media flows
/// only after [`MediaEngine::resume_consumer`].
#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub kind: MediaKind,
    pub media_parameters: Value,
}

/// A data producer allocated by the engine.
#[derive(Debug, Clone)]
pub struct DataProducerInfo {
    pub id: DataProducerId,
    pub stream_id: u16,
}

/// A data consumer allocated by the engine (no pause phase).
#[derive(Debug, Clone)]
pub struct DataConsumerInfo {
    pub id: DataConsumerId,
    pub label: String,
    pub protocol: String,
    pub stream_id: u16,
}

/// Driver interface for the external media-routing engine.
///
/// Implementations wrap whatever process or API actually moves media;
/// [`LoopbackEngine`](crate::LoopbackEngine) is the in-process stand-in
/// used by tests. All calls are suspension points; callers must finish
/// their registry bookkeeping strictly before or strictly after awaiting
/// one of these, never in between.
/// Methods return `impl Future + Send` rather than plain `async fn` so
/// handler tasks generic over the engine stay spawnable.
pub trait MediaEngine: Send + Sync + 'static {
    /// The engine's capability description, negotiated against each
    /// peer's remote capabilities.
    fn capabilities(
        &self,
    ) -> impl Future<Output = Result<Value, MediaError>> + Send;

    /// Allocates a transport for one direction of one peer.
    fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> impl Future<Output = Result<TransportInfo, MediaError>> + Send;

    /// One-shot handshake with the remote DTLS parameters.
    fn connect_transport(
        &self,
        id: &TransportId,
        remote_dtls: Value,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Registers a media producer on the given transport.
    fn create_producer(
        &self,
        transport: &TransportId,
        kind: MediaKind,
        media_parameters: Value,
    ) -> impl Future<Output = Result<ProducerId, MediaError>> + Send;

    /// Registers a data producer on the given transport.
    fn create_data_producer(
        &self,
        transport: &TransportId,
        label: &str,
        protocol: &str,
        stream_parameters: Value,
    ) -> impl Future<Output = Result<DataProducerInfo, MediaError>> + Send;

    /// Whether `capabilities` can receive the given producer. Checked
    /// before any consumer allocation.
    fn can_consume(
        &self,
        producer: &ProducerId,
        capabilities: &Value,
    ) -> impl Future<Output = Result<bool, MediaError>> + Send;

    /// Allocates a consumer for `producer` on the given transport,
    /// in the paused state.
    fn create_consumer(
        &self,
        transport: &TransportId,
        producer: &ProducerId,
        capabilities: Value,
    ) -> impl Future<Output = Result<ConsumerInfo, MediaError>> + Send;

    /// Allocates a data consumer for `data_producer`.
    fn create_data_consumer(
        &self,
        transport: &TransportId,
        data_producer: &DataProducerId,
    ) -> impl Future<Output = Result<DataConsumerInfo, MediaError>> + Send;

    /// Second phase of the consume handshake: starts media flow.
    fn resume_consumer(
        &self,
        id: &ConsumerId,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Closes a transport. Engine-side closure cascades to every
    /// producer/consumer riding on it.
    fn close_transport(
        &self,
        id: &TransportId,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    fn close_producer(
        &self,
        id: &ProducerId,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    fn close_consumer(
        &self,
        id: &ConsumerId,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    fn close_data_producer(
        &self,
        id: &DataProducerId,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;

    fn close_data_consumer(
        &self,
        id: &DataConsumerId,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;
}
