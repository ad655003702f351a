//! In-process media engine used by tests and development servers.
//!
//! No media actually moves: the loopback engine hands out token ids and
//! remembers just enough state to answer the orchestrator's questions.
//! Its compatibility rule is deliberately simple: capabilities are
//! compatible with a producer when their `kinds` array names the
//! producer's kind.

use std::collections::HashMap;

use atrium_protocol::{
    ConsumerId, DataConsumerId, DataProducerId, MediaKind, ProducerId,
    TransportId, TransportDirection,
};
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::{
    ConsumerInfo, DataConsumerInfo, DataProducerInfo, MediaEngine,
    MediaError, TransportInfo,
};

#[derive(Default)]
struct LoopbackState {
    transports: HashMap<TransportId, bool>, // connected?
    producers: HashMap<ProducerId, MediaKind>,
    data_producers: HashMap<DataProducerId, (String, String, u16)>,
    consumers: HashMap<ConsumerId, bool>, // paused?
    data_consumers: HashMap<DataConsumerId, DataProducerId>,
    next_stream_id: u16,
}

/// An in-memory [`MediaEngine`].
#[derive(Default)]
pub struct LoopbackEngine {
    state: Mutex<LoopbackState>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the given consumer is currently paused. Test hook.
    pub async fn consumer_paused(&self, id: &ConsumerId) -> Option<bool> {
        self.state.lock().await.consumers.get(id).copied()
    }

    /// Whether the given transport is still alive. Test hook.
    pub async fn has_transport(&self, id: &TransportId) -> bool {
        self.state.lock().await.transports.contains_key(id)
    }

    /// Whether the given data consumer is still alive. Test hook.
    pub async fn has_data_consumer(&self, id: &DataConsumerId) -> bool {
        self.state.lock().await.data_consumers.contains_key(id)
    }
}

/// Generates a random 32-character hex token, the shape engine ids take.
fn engine_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl MediaEngine for LoopbackEngine {
    async fn capabilities(&self) -> Result<Value, MediaError> {
        Ok(json!({
            "kinds": ["audio", "video"],
            "data": true,
        }))
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> Result<TransportInfo, MediaError> {
        let id = TransportId(engine_token());
        self.state
            .lock()
            .await
            .transports
            .insert(id.clone(), false);
        tracing::debug!(transport_id = %id, %direction, "loopback transport created");
        Ok(TransportInfo {
            id,
            ice_info: json!({ "candidates": [] }),
            dtls_info: json!({ "fingerprints": [] }),
            sctp_info: json!({ "max_streams": 1024 }),
        })
    }

    async fn connect_transport(
        &self,
        id: &TransportId,
        _remote_dtls: Value,
    ) -> Result<(), MediaError> {
        let mut state = self.state.lock().await;
        match state.transports.get_mut(id) {
            Some(connected) => {
                *connected = true;
                Ok(())
            }
            None => Err(MediaError::TransportNotFound(id.clone())),
        }
    }

    async fn create_producer(
        &self,
        transport: &TransportId,
        kind: MediaKind,
        _media_parameters: Value,
    ) -> Result<ProducerId, MediaError> {
        let mut state = self.state.lock().await;
        if !state.transports.contains_key(transport) {
            return Err(MediaError::TransportNotFound(transport.clone()));
        }
        let id = ProducerId(engine_token());
        state.producers.insert(id.clone(), kind);
        Ok(id)
    }

    async fn create_data_producer(
        &self,
        transport: &TransportId,
        label: &str,
        protocol: &str,
        _stream_parameters: Value,
    ) -> Result<DataProducerInfo, MediaError> {
        let mut state = self.state.lock().await;
        if !state.transports.contains_key(transport) {
            return Err(MediaError::TransportNotFound(transport.clone()));
        }
        let stream_id = state.next_stream_id;
        state.next_stream_id += 1;
        let id = DataProducerId(engine_token());
        state.data_producers.insert(
            id.clone(),
            (label.to_string(), protocol.to_string(), stream_id),
        );
        Ok(DataProducerInfo { id, stream_id })
    }

    async fn can_consume(
        &self,
        producer: &ProducerId,
        capabilities: &Value,
    ) -> Result<bool, MediaError> {
        let state = self.state.lock().await;
        let kind = state
            .producers
            .get(producer)
            .ok_or_else(|| MediaError::ProducerNotFound(producer.clone()))?;
        let compatible = capabilities
            .get("kinds")
            .and_then(Value::as_array)
            .is_some_and(|kinds| {
                kinds.iter().any(|k| k.as_str() == Some(&kind.to_string()))
            });
        Ok(compatible)
    }

    async fn create_consumer(
        &self,
        transport: &TransportId,
        producer: &ProducerId,
        _capabilities: Value,
    ) -> Result<ConsumerInfo, MediaError> {
        let mut state = self.state.lock().await;
        if !state.transports.contains_key(transport) {
            return Err(MediaError::TransportNotFound(transport.clone()));
        }
        let kind = *state
            .producers
            .get(producer)
            .ok_or_else(|| MediaError::ProducerNotFound(producer.clone()))?;
        let id = ConsumerId(engine_token());
        // Created paused: the receiving side finishes playback setup
        // before any frames arrive.
        state.consumers.insert(id.clone(), true);
        Ok(ConsumerInfo {
            id,
            kind,
            media_parameters: json!({}),
        })
    }

    async fn create_data_consumer(
        &self,
        transport: &TransportId,
        data_producer: &DataProducerId,
    ) -> Result<DataConsumerInfo, MediaError> {
        let mut state = self.state.lock().await;
        if !state.transports.contains_key(transport) {
            return Err(MediaError::TransportNotFound(transport.clone()));
        }
        let (label, protocol, stream_id) = state
            .data_producers
            .get(data_producer)
            .cloned()
            .ok_or_else(|| {
                MediaError::DataProducerNotFound(data_producer.clone())
            })?;
        let id = DataConsumerId(engine_token());
        state.data_consumers.insert(id.clone(), data_producer.clone());
        Ok(DataConsumerInfo {
            id,
            label,
            protocol,
            stream_id,
        })
    }

    async fn resume_consumer(
        &self,
        id: &ConsumerId,
    ) -> Result<(), MediaError> {
        let mut state = self.state.lock().await;
        match state.consumers.get_mut(id) {
            Some(paused) => {
                *paused = false;
                Ok(())
            }
            None => Err(MediaError::ConsumerNotFound(id.clone())),
        }
    }

    async fn close_transport(
        &self,
        id: &TransportId,
    ) -> Result<(), MediaError> {
        self.state.lock().await.transports.remove(id);
        Ok(())
    }

    async fn close_producer(
        &self,
        id: &ProducerId,
    ) -> Result<(), MediaError> {
        self.state.lock().await.producers.remove(id);
        Ok(())
    }

    async fn close_consumer(
        &self,
        id: &ConsumerId,
    ) -> Result<(), MediaError> {
        self.state.lock().await.consumers.remove(id);
        Ok(())
    }

    async fn close_data_producer(
        &self,
        id: &DataProducerId,
    ) -> Result<(), MediaError> {
        self.state.lock().await.data_producers.remove(id);
        Ok(())
    }

    async fn close_data_consumer(
        &self,
        id: &DataConsumerId,
    ) -> Result<(), MediaError> {
        self.state.lock().await.data_consumers.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consumer_created_paused_then_resumed() {
        let engine = LoopbackEngine::new();
        let transport = engine
            .create_transport(TransportDirection::Consuming)
            .await
            .unwrap();
        let send = engine
            .create_transport(TransportDirection::Producing)
            .await
            .unwrap();
        let producer = engine
            .create_producer(&send.id, MediaKind::Audio, json!({}))
            .await
            .unwrap();

        let consumer = engine
            .create_consumer(&transport.id, &producer, json!({}))
            .await
            .unwrap();
        assert_eq!(engine.consumer_paused(&consumer.id).await, Some(true));

        engine.resume_consumer(&consumer.id).await.unwrap();
        assert_eq!(engine.consumer_paused(&consumer.id).await, Some(false));
    }

    #[tokio::test]
    async fn test_resume_unknown_consumer_is_not_found() {
        let engine = LoopbackEngine::new();
        let result = engine
            .resume_consumer(&ConsumerId("missing".into()))
            .await;
        assert!(matches!(result, Err(MediaError::ConsumerNotFound(_))));
    }

    #[tokio::test]
    async fn test_can_consume_matches_on_kind() {
        let engine = LoopbackEngine::new();
        let transport = engine
            .create_transport(TransportDirection::Producing)
            .await
            .unwrap();
        let producer = engine
            .create_producer(&transport.id, MediaKind::Audio, json!({}))
            .await
            .unwrap();

        let yes = engine
            .can_consume(&producer, &json!({"kinds": ["audio"]}))
            .await
            .unwrap();
        assert!(yes);

        let no = engine
            .can_consume(&producer, &json!({"kinds": ["video"]}))
            .await
            .unwrap();
        assert!(!no);
    }

    #[tokio::test]
    async fn test_data_producer_stream_ids_increment() {
        let engine = LoopbackEngine::new();
        let transport = engine
            .create_transport(TransportDirection::Producing)
            .await
            .unwrap();
        let a = engine
            .create_data_producer(&transport.id, "app", "sub", json!({}))
            .await
            .unwrap();
        let b = engine
            .create_data_producer(&transport.id, "app", "sub", json!({}))
            .await
            .unwrap();
        assert_ne!(a.stream_id, b.stream_id);
    }

    #[tokio::test]
    async fn test_close_data_consumer_removes_it() {
        let engine = LoopbackEngine::new();
        let send = engine
            .create_transport(TransportDirection::Producing)
            .await
            .unwrap();
        let recv = engine
            .create_transport(TransportDirection::Consuming)
            .await
            .unwrap();
        let data_producer = engine
            .create_data_producer(&send.id, "app", "sub", json!({}))
            .await
            .unwrap();
        let data_consumer = engine
            .create_data_consumer(&recv.id, &data_producer.id)
            .await
            .unwrap();
        assert!(engine.has_data_consumer(&data_consumer.id).await);

        engine.close_data_consumer(&data_consumer.id).await.unwrap();
        assert!(!engine.has_data_consumer(&data_consumer.id).await);
    }

    #[tokio::test]
    async fn test_produce_on_unknown_transport_fails() {
        let engine = LoopbackEngine::new();
        let result = engine
            .create_producer(
                &TransportId("gone".into()),
                MediaKind::Video,
                json!({}),
            )
            .await;
        assert!(matches!(result, Err(MediaError::TransportNotFound(_))));
    }
}
