//! Per-room bookkeeping of what the engine allocated for whom.
//!
//! Transports are tracked twice: by engine id and by (peer, direction).
//! The two views must stay consistent, so every mutation goes through a
//! method that updates both. All methods are synchronous; callers perform
//! engine calls strictly before or after, never while holding the tables.

use std::collections::HashMap;

use atrium_protocol::{
    ConsumerId, DataConsumerId, DataProducerId, MediaKind, PeerId,
    ProducerId, ProducerSummary, TransportDirection, TransportId,
};

#[derive(Debug, Clone)]
pub struct TransportRecord {
    pub id: TransportId,
    pub peer: PeerId,
    pub direction: TransportDirection,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub id: ProducerId,
    pub peer: PeerId,
    pub kind: MediaKind,
}

#[derive(Debug, Clone)]
pub struct DataProducerRecord {
    pub id: DataProducerId,
    pub peer: PeerId,
    pub label: String,
    pub protocol: String,
    pub stream_id: u16,
}

#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    pub id: ConsumerId,
    pub peer: PeerId,
    pub producer: ProducerId,
    pub kind: MediaKind,
    pub paused: bool,
}

#[derive(Debug, Clone)]
pub struct DataConsumerRecord {
    pub id: DataConsumerId,
    pub peer: PeerId,
    pub data_producer: DataProducerId,
}

/// Everything that must be torn down outside the lock after a peer is
/// removed from the tables. Closing the transports cascades engine-side
/// to the rows riding them, but consumers other peers held on the
/// removed peer's producers ride surviving transports; those need their
/// own engine closes. The producer lists are reported for notification
/// fan-out.
#[derive(Debug, Default)]
pub struct PeerMediaTeardown {
    pub transports: Vec<TransportId>,
    pub producers: Vec<ProducerId>,
    pub data_producers: Vec<DataProducerId>,
    pub consumers: Vec<ConsumerId>,
    pub data_consumers: Vec<DataConsumerId>,
}

/// One room's media state.
#[derive(Debug, Default)]
pub struct MediaTables {
    transports: HashMap<TransportId, TransportRecord>,
    by_peer_direction: HashMap<(PeerId, TransportDirection), TransportId>,
    producers: HashMap<ProducerId, ProducerRecord>,
    data_producers: HashMap<DataProducerId, DataProducerRecord>,
    consumers: HashMap<ConsumerId, ConsumerRecord>,
    data_consumers: HashMap<DataConsumerId, DataConsumerRecord>,
}

impl MediaTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport for (peer, direction). If the peer already
    /// had one in that direction, its record is dropped and the displaced
    /// id returned so the caller can close it engine-side.
    pub fn insert_transport(
        &mut self,
        peer: PeerId,
        direction: TransportDirection,
        id: TransportId,
    ) -> Option<TransportId> {
        let displaced = self.by_peer_direction.remove(&(peer, direction));
        if let Some(old) = &displaced {
            self.transports.remove(old);
            tracing::debug!(
                %peer, %direction, old = %old, new = %id,
                "transport replaced"
            );
        }
        self.by_peer_direction.insert((peer, direction), id.clone());
        self.transports.insert(
            id.clone(),
            TransportRecord { id, peer, direction, connected: false },
        );
        displaced
    }

    /// Marks a transport connected. Returns whether it was already
    /// connected; a repeat handshake is acknowledged without another
    /// engine call.
    pub fn mark_connected(&mut self, id: &TransportId) -> Option<bool> {
        let record = self.transports.get_mut(id)?;
        let already = record.connected;
        record.connected = true;
        Some(already)
    }

    pub fn transport(&self, id: &TransportId) -> Option<&TransportRecord> {
        self.transports.get(id)
    }

    /// The peer's live transport in the given direction, if any.
    pub fn transport_for(
        &self,
        peer: PeerId,
        direction: TransportDirection,
    ) -> Option<&TransportRecord> {
        let id = self.by_peer_direction.get(&(peer, direction))?;
        self.transports.get(id)
    }

    pub fn insert_producer(
        &mut self,
        peer: PeerId,
        id: ProducerId,
        kind: MediaKind,
    ) {
        self.producers
            .insert(id.clone(), ProducerRecord { id, peer, kind });
    }

    pub fn producer(&self, id: &ProducerId) -> Option<&ProducerRecord> {
        self.producers.get(id)
    }

    /// Drops a producer and every consumer attached to it. Returns the
    /// consumer records so the owning peers can be notified, or `None` if
    /// the producer was unknown.
    pub fn remove_producer(
        &mut self,
        id: &ProducerId,
    ) -> Option<(ProducerRecord, Vec<ConsumerRecord>)> {
        let record = self.producers.remove(id)?;
        let orphaned: Vec<ConsumerId> = self
            .consumers
            .values()
            .filter(|c| c.producer == *id)
            .map(|c| c.id.clone())
            .collect();
        let consumers = orphaned
            .iter()
            .filter_map(|cid| self.consumers.remove(cid))
            .collect();
        Some((record, consumers))
    }

    pub fn insert_data_producer(&mut self, record: DataProducerRecord) {
        self.data_producers.insert(record.id.clone(), record);
    }

    pub fn data_producer(
        &self,
        id: &DataProducerId,
    ) -> Option<&DataProducerRecord> {
        self.data_producers.get(id)
    }

    pub fn remove_data_producer(
        &mut self,
        id: &DataProducerId,
    ) -> Option<(DataProducerRecord, Vec<DataConsumerRecord>)> {
        let record = self.data_producers.remove(id)?;
        let orphaned: Vec<DataConsumerId> = self
            .data_consumers
            .values()
            .filter(|c| c.data_producer == *id)
            .map(|c| c.id.clone())
            .collect();
        let consumers = orphaned
            .iter()
            .filter_map(|cid| self.data_consumers.remove(cid))
            .collect();
        Some((record, consumers))
    }

    pub fn insert_consumer(&mut self, record: ConsumerRecord) {
        self.consumers.insert(record.id.clone(), record);
    }

    pub fn consumer(&self, id: &ConsumerId) -> Option<&ConsumerRecord> {
        self.consumers.get(id)
    }

    pub fn mark_resumed(&mut self, id: &ConsumerId) -> bool {
        match self.consumers.get_mut(id) {
            Some(record) => {
                record.paused = false;
                true
            }
            None => false,
        }
    }

    pub fn insert_data_consumer(&mut self, record: DataConsumerRecord) {
        self.data_consumers.insert(record.id.clone(), record);
    }

    /// Producers owned by peers other than `exclude`, the set a newly
    /// joined peer should start consuming.
    pub fn list_producers(&self, exclude: PeerId) -> Vec<ProducerSummary> {
        let mut listed: Vec<ProducerSummary> = self
            .producers
            .values()
            .filter(|p| p.peer != exclude)
            .map(|p| ProducerSummary {
                id: p.id.clone(),
                owner_peer_id: p.peer,
                kind: p.kind,
            })
            .collect();
        listed.sort_by_key(|p| p.owner_peer_id);
        listed
    }

    /// Data producers owned by peers other than `exclude`.
    pub fn list_data_producers(
        &self,
        exclude: PeerId,
    ) -> Vec<DataProducerRecord> {
        let mut listed: Vec<DataProducerRecord> = self
            .data_producers
            .values()
            .filter(|p| p.peer != exclude)
            .cloned()
            .collect();
        listed.sort_by_key(|p| p.peer);
        listed
    }

    /// Removes every row owned by `peer`, plus the consumers other peers
    /// hold on the departing peer's producers. Pure bookkeeping; the
    /// returned teardown lists what the caller must close engine-side and
    /// announce to the room.
    pub fn remove_peer(&mut self, peer: PeerId) -> PeerMediaTeardown {
        let mut teardown = PeerMediaTeardown::default();

        self.by_peer_direction.retain(|(p, _), _| *p != peer);
        self.transports.retain(|id, record| {
            if record.peer == peer {
                teardown.transports.push(id.clone());
                false
            } else {
                true
            }
        });

        self.producers.retain(|id, record| {
            if record.peer == peer {
                teardown.producers.push(id.clone());
                false
            } else {
                true
            }
        });
        self.data_producers.retain(|id, record| {
            if record.peer == peer {
                teardown.data_producers.push(id.clone());
                false
            } else {
                true
            }
        });

        // Consumers go two ways: those the departing peer held, and those
        // other peers held on the departing peer's producers.
        self.consumers.retain(|id, record| {
            if record.peer == peer
                || teardown.producers.contains(&record.producer)
            {
                teardown.consumers.push(id.clone());
                false
            } else {
                true
            }
        });
        self.data_consumers.retain(|id, record| {
            if record.peer == peer
                || teardown.data_producers.contains(&record.data_producer)
            {
                teardown.data_consumers.push(id.clone());
                false
            } else {
                true
            }
        });

        teardown
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
            && self.producers.is_empty()
            && self.data_producers.is_empty()
            && self.consumers.is_empty()
            && self.data_consumers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> TransportId {
        TransportId(s.to_string())
    }

    fn pid(s: &str) -> ProducerId {
        ProducerId(s.to_string())
    }

    #[test]
    fn test_insert_transport_keeps_both_views_consistent() {
        let mut tables = MediaTables::new();
        let peer = PeerId(1);
        let displaced = tables.insert_transport(
            peer,
            TransportDirection::Producing,
            tid("t1"),
        );
        assert!(displaced.is_none());

        let record = tables
            .transport_for(peer, TransportDirection::Producing)
            .unwrap();
        assert_eq!(record.id, tid("t1"));
        assert!(!record.connected);
        assert!(tables.transport(&tid("t1")).is_some());
    }

    #[test]
    fn test_insert_transport_same_direction_displaces_old() {
        let mut tables = MediaTables::new();
        let peer = PeerId(1);
        tables.insert_transport(peer, TransportDirection::Producing, tid("t1"));
        let displaced = tables.insert_transport(
            peer,
            TransportDirection::Producing,
            tid("t2"),
        );
        assert_eq!(displaced, Some(tid("t1")));
        assert!(tables.transport(&tid("t1")).is_none());
        assert_eq!(
            tables
                .transport_for(peer, TransportDirection::Producing)
                .unwrap()
                .id,
            tid("t2")
        );
    }

    #[test]
    fn test_insert_transport_other_direction_coexists() {
        let mut tables = MediaTables::new();
        let peer = PeerId(1);
        tables.insert_transport(peer, TransportDirection::Producing, tid("t1"));
        let displaced = tables.insert_transport(
            peer,
            TransportDirection::Consuming,
            tid("t2"),
        );
        assert!(displaced.is_none());
        assert!(tables.transport(&tid("t1")).is_some());
        assert!(tables.transport(&tid("t2")).is_some());
    }

    #[test]
    fn test_mark_connected_reports_repeat_handshake() {
        let mut tables = MediaTables::new();
        tables.insert_transport(
            PeerId(1),
            TransportDirection::Producing,
            tid("t1"),
        );
        assert_eq!(tables.mark_connected(&tid("t1")), Some(false));
        assert_eq!(tables.mark_connected(&tid("t1")), Some(true));
        assert_eq!(tables.mark_connected(&tid("nope")), None);
    }

    #[test]
    fn test_list_producers_excludes_caller_and_sorts_by_peer() {
        let mut tables = MediaTables::new();
        tables.insert_producer(PeerId(3), pid("p3"), MediaKind::Video);
        tables.insert_producer(PeerId(1), pid("p1"), MediaKind::Audio);
        tables.insert_producer(PeerId(2), pid("p2"), MediaKind::Audio);

        let listed = tables.list_producers(PeerId(2));
        let peers: Vec<PeerId> =
            listed.iter().map(|p| p.owner_peer_id).collect();
        assert_eq!(peers, vec![PeerId(1), PeerId(3)]);
    }

    #[test]
    fn test_remove_producer_orphans_its_consumers() {
        let mut tables = MediaTables::new();
        tables.insert_producer(PeerId(1), pid("p1"), MediaKind::Audio);
        tables.insert_consumer(ConsumerRecord {
            id: ConsumerId("c1".into()),
            peer: PeerId(2),
            producer: pid("p1"),
            kind: MediaKind::Audio,
            paused: true,
        });

        let (record, consumers) = tables.remove_producer(&pid("p1")).unwrap();
        assert_eq!(record.peer, PeerId(1));
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].peer, PeerId(2));
        assert!(tables.consumer(&ConsumerId("c1".into())).is_none());
    }

    #[test]
    fn test_remove_peer_purges_cross_peer_consumers() {
        let mut tables = MediaTables::new();
        let leaving = PeerId(1);
        let staying = PeerId(2);

        tables.insert_transport(
            leaving,
            TransportDirection::Producing,
            tid("t1"),
        );
        tables.insert_transport(
            staying,
            TransportDirection::Consuming,
            tid("t2"),
        );
        tables.insert_producer(leaving, pid("p1"), MediaKind::Audio);
        tables.insert_producer(staying, pid("p2"), MediaKind::Audio);
        // The staying peer consumes the leaving peer's producer, and
        // vice versa.
        tables.insert_consumer(ConsumerRecord {
            id: ConsumerId("c-stays-on-p1".into()),
            peer: staying,
            producer: pid("p1"),
            kind: MediaKind::Audio,
            paused: false,
        });
        tables.insert_consumer(ConsumerRecord {
            id: ConsumerId("c-leaves-on-p2".into()),
            peer: leaving,
            producer: pid("p2"),
            kind: MediaKind::Audio,
            paused: false,
        });

        let teardown = tables.remove_peer(leaving);

        assert_eq!(teardown.transports, vec![tid("t1")]);
        assert_eq!(teardown.producers, vec![pid("p1")]);
        assert_eq!(teardown.consumers.len(), 2);

        // The staying peer's own rows survive.
        assert!(tables.transport(&tid("t2")).is_some());
        assert!(tables.producer(&pid("p2")).is_some());
        assert!(tables
            .transport_for(staying, TransportDirection::Consuming)
            .is_some());
        assert!(tables
            .transport_for(leaving, TransportDirection::Producing)
            .is_none());
    }

    #[test]
    fn test_remove_peer_purges_data_rows() {
        let mut tables = MediaTables::new();
        let leaving = PeerId(1);
        tables.insert_data_producer(DataProducerRecord {
            id: DataProducerId("dp1".into()),
            peer: leaving,
            label: "app".into(),
            protocol: "sub".into(),
            stream_id: 0,
        });
        tables.insert_data_consumer(DataConsumerRecord {
            id: DataConsumerId("dc1".into()),
            peer: PeerId(2),
            data_producer: DataProducerId("dp1".into()),
        });

        let teardown = tables.remove_peer(leaving);
        assert_eq!(teardown.data_producers.len(), 1);
        assert_eq!(teardown.data_consumers.len(), 1);
        assert!(tables.is_empty());
    }
}
