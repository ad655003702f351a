//! One room: its peers, media bookkeeping, equipment and eggs.
//!
//! All methods are synchronous. Anything with an engine or store
//! side-effect returns a description of the work (displaced transports,
//! teardown lists, flush entries) for the caller to execute after
//! releasing the registry lock.

use std::collections::HashMap;

use atrium_media::{
    ConsumerRecord, DataConsumerRecord, DataProducerRecord, MediaTables,
    PeerMediaTeardown, ProducerRecord, TransportRecord,
};
use atrium_protocol::{
    ConsumerId, DataProducerId, EggId, MediaKind, Notification, PeerId,
    PeerSummary, ProducerId, ProducerSummary, RoomId, RoomOptions,
    TransportDirection, TransportId, UserId,
};
use atrium_session::{unix_millis, EquipmentLedger, UserEquipment};
use atrium_transport::ConnectionId;
use tokio::task::JoinHandle;

use crate::{EggBroadcaster, NoticeSender, PeerSession, RoomConfig, RoomError};

/// What a peer's removal leaves for the caller to execute outside the
/// registry lock.
#[derive(Debug)]
pub struct PeerRemoval {
    pub connection: ConnectionId,
    pub teardown: PeerMediaTeardown,
    /// The departing peer's identified equipment entry, if any.
    pub flush: Option<UserEquipment>,
    pub new_host: Option<PeerId>,
}

pub struct Room {
    pub id: RoomId,
    pub config: RoomConfig,
    peers: HashMap<PeerId, PeerSession>,
    next_peer_id: u64,
    /// Display name to model handle, remembered for the room's lifetime
    /// so a name keeps its avatar across rejoins.
    model_assignment: HashMap<String, String>,
    pub equipment: EquipmentLedger,
    media: MediaTables,
    eggs: Option<EggBroadcaster>,
    egg_task: Option<JoinHandle<()>>,
    pub created_at_ms: u64,
}

impl Room {
    pub fn new(id: RoomId, options: RoomOptions) -> Self {
        let eggs = options
            .map_kind
            .eggs_enabled()
            .then(EggBroadcaster::new);
        Self {
            id,
            // The creating peer always receives the first id.
            config: RoomConfig::from_options(options, PeerId(1)),
            peers: HashMap::new(),
            next_peer_id: 1,
            model_assignment: HashMap::new(),
            equipment: EquipmentLedger::new(),
            media: MediaTables::new(),
            eggs,
            egg_task: None,
            created_at_ms: unix_millis(),
        }
    }

    // -- peers --------------------------------------------------------

    /// Adds a peer and announces it to everyone already present.
    /// Returns the assigned id and the effective model handle (a display
    /// name that appeared before keeps its original handle).
    pub fn add_peer(
        &mut self,
        connection: ConnectionId,
        display_name: String,
        requested_handle: String,
        user_id: Option<UserId>,
        equipment: UserEquipment,
        notices: NoticeSender,
    ) -> (PeerId, String) {
        let peer_id = PeerId(self.next_peer_id);
        self.next_peer_id += 1;

        let model_handle = self
            .model_assignment
            .entry(display_name.clone())
            .or_insert(requested_handle)
            .clone();

        self.broadcast(Notification::PeerJoined {
            room_id: self.id,
            peer_id,
            display_name: display_name.clone(),
            model_handle: model_handle.clone(),
        });

        self.equipment.insert(peer_id, equipment);
        self.peers.insert(
            peer_id,
            PeerSession::new(
                peer_id,
                connection,
                display_name,
                model_handle.clone(),
                user_id,
                notices,
            ),
        );
        (peer_id, model_handle)
    }

    pub fn peer(&self, id: PeerId) -> Option<&PeerSession> {
        self.peers.get(&id)
    }

    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut PeerSession> {
        self.peers.get_mut(&id)
    }

    fn require_peer(&self, id: PeerId) -> Result<&PeerSession, RoomError> {
        self.peers.get(&id).ok_or(RoomError::PeerNotFound {
            room: self.id,
            peer: id,
        })
    }

    pub fn occupancy(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.config.max_occupancy
    }

    /// Full roster snapshot, sorted by id.
    pub fn roster(&self) -> Vec<PeerSummary> {
        let mut roster: Vec<PeerSummary> =
            self.peers.values().map(PeerSession::summary).collect();
        roster.sort_by_key(|p| p.peer_id);
        roster
    }

    /// Roster snapshot excluding the given peer, sorted by id.
    pub fn roster_excluding(&self, exclude: PeerId) -> Vec<PeerSummary> {
        let mut roster: Vec<PeerSummary> = self
            .peers
            .values()
            .filter(|p| p.id != exclude)
            .map(PeerSession::summary)
            .collect();
        roster.sort_by_key(|p| p.peer_id);
        roster
    }

    pub fn touch(&mut self, peer: PeerId) {
        if let Some(session) = self.peers.get_mut(&peer) {
            session.touch();
        }
    }

    pub fn broadcast(&self, notification: Notification) {
        for peer in self.peers.values() {
            peer.notify(notification.clone());
        }
    }

    pub fn broadcast_except(
        &self,
        exclude: PeerId,
        notification: Notification,
    ) {
        for peer in self.peers.values().filter(|p| p.id != exclude) {
            peer.notify(notification.clone());
        }
    }

    /// Removes a peer and everything it owned. Announces the departure
    /// (and each closed producer) to the remaining peers, reassigns the
    /// host if needed, and hands back the off-lock work.
    pub fn remove_peer(&mut self, peer: PeerId) -> Option<PeerRemoval> {
        let session = self.peers.remove(&peer)?;
        let teardown = self.media.remove_peer(peer);
        let flush = self.equipment.take_for_flush(peer);

        for producer_id in &teardown.producers {
            self.broadcast(Notification::ProducerClosed {
                room_id: self.id,
                peer_id: peer,
                producer_id: producer_id.clone(),
            });
        }
        for data_producer_id in &teardown.data_producers {
            self.broadcast(Notification::DataProducerClosed {
                room_id: self.id,
                peer_id: peer,
                data_producer_id: data_producer_id.clone(),
            });
        }
        self.broadcast(Notification::PeerLeft {
            room_id: self.id,
            peer_id: peer,
        });

        let mut new_host = None;
        if self.config.host_peer_id == peer {
            if let Some(next) = self.peers.keys().min().copied() {
                self.config.host_peer_id = next;
                new_host = Some(next);
                tracing::info!(
                    room_id = %self.id, old_host = %peer, %next,
                    "host reassigned"
                );
            }
        }

        Some(PeerRemoval {
            connection: session.connection,
            teardown,
            flush,
            new_host,
        })
    }

    // -- media bookkeeping --------------------------------------------

    /// Records a freshly allocated transport. At most one transport per
    /// (peer, direction): a previous one is displaced and returned for
    /// the caller to close engine-side.
    pub fn record_transport(
        &mut self,
        peer: PeerId,
        direction: TransportDirection,
        id: TransportId,
    ) -> Result<Option<TransportId>, RoomError> {
        self.require_peer(peer)?;
        let displaced = self.media.insert_transport(peer, direction, id.clone());
        let session = self.peers.get_mut(&peer).unwrap();
        if let Some(old) = &displaced {
            session.transports.retain(|t| t != old);
        }
        session.transports.push(id);
        Ok(displaced)
    }

    pub fn mark_transport_connected(
        &mut self,
        id: &TransportId,
    ) -> Option<bool> {
        self.media.mark_connected(id)
    }

    pub fn transport(&self, id: &TransportId) -> Option<&TransportRecord> {
        self.media.transport(id)
    }

    pub fn transport_for(
        &self,
        peer: PeerId,
        direction: TransportDirection,
    ) -> Option<&TransportRecord> {
        self.media.transport_for(peer, direction)
    }

    /// Records a producer and announces it to the other peers.
    pub fn record_producer(
        &mut self,
        peer: PeerId,
        id: ProducerId,
        kind: MediaKind,
    ) -> Result<(), RoomError> {
        self.require_peer(peer)?;
        self.media.insert_producer(peer, id.clone(), kind);
        self.peers
            .get_mut(&peer)
            .unwrap()
            .producers
            .push(id.clone());
        self.broadcast_except(
            peer,
            Notification::NewProducer {
                room_id: self.id,
                peer_id: peer,
                producer_id: id,
                kind,
            },
        );
        Ok(())
    }

    pub fn producer(&self, id: &ProducerId) -> Option<&ProducerRecord> {
        self.media.producer(id)
    }

    /// Drops a producer, announces the closure, and returns the orphaned
    /// consumer records so the caller can close them engine-side.
    pub fn remove_producer(
        &mut self,
        peer: PeerId,
        id: &ProducerId,
    ) -> Option<Vec<ConsumerRecord>> {
        let (record, orphans) = self.media.remove_producer(id)?;
        if let Some(session) = self.peers.get_mut(&record.peer) {
            session.producers.retain(|p| p != id);
        }
        for orphan in &orphans {
            if let Some(session) = self.peers.get_mut(&orphan.peer) {
                session.consumers.retain(|c| c != &orphan.id);
            }
        }
        self.broadcast_except(
            peer,
            Notification::ProducerClosed {
                room_id: self.id,
                peer_id: record.peer,
                producer_id: id.clone(),
            },
        );
        Some(orphans)
    }

    pub fn record_data_producer(
        &mut self,
        record: DataProducerRecord,
    ) -> Result<(), RoomError> {
        self.require_peer(record.peer)?;
        let peer = record.peer;
        self.peers
            .get_mut(&peer)
            .unwrap()
            .data_producers
            .push(record.id.clone());
        self.broadcast_except(
            peer,
            Notification::NewDataProducer {
                room_id: self.id,
                peer_id: peer,
                data_producer_id: record.id.clone(),
                label: record.label.clone(),
                protocol: record.protocol.clone(),
            },
        );
        self.media.insert_data_producer(record);
        Ok(())
    }

    pub fn data_producer(
        &self,
        id: &DataProducerId,
    ) -> Option<&DataProducerRecord> {
        self.media.data_producer(id)
    }

    pub fn remove_data_producer(
        &mut self,
        peer: PeerId,
        id: &DataProducerId,
    ) -> Option<Vec<DataConsumerRecord>> {
        let (record, orphans) = self.media.remove_data_producer(id)?;
        if let Some(session) = self.peers.get_mut(&record.peer) {
            session.data_producers.retain(|p| p != id);
        }
        for orphan in &orphans {
            if let Some(session) = self.peers.get_mut(&orphan.peer) {
                session.data_consumers.retain(|c| c != &orphan.id);
            }
        }
        self.broadcast_except(
            peer,
            Notification::DataProducerClosed {
                room_id: self.id,
                peer_id: record.peer,
                data_producer_id: id.clone(),
            },
        );
        Some(orphans)
    }

    pub fn record_consumer(
        &mut self,
        record: ConsumerRecord,
    ) -> Result<(), RoomError> {
        self.require_peer(record.peer)?;
        let peer = record.peer;
        let id = record.id.clone();
        self.media.insert_consumer(record);
        self.peers.get_mut(&peer).unwrap().consumers.push(id);
        Ok(())
    }

    pub fn consumer(&self, id: &ConsumerId) -> Option<&ConsumerRecord> {
        self.media.consumer(id)
    }

    pub fn mark_consumer_resumed(&mut self, id: &ConsumerId) -> bool {
        self.media.mark_resumed(id)
    }

    pub fn record_data_consumer(
        &mut self,
        record: DataConsumerRecord,
    ) -> Result<(), RoomError> {
        self.require_peer(record.peer)?;
        let peer = record.peer;
        let id = record.id.clone();
        self.media.insert_data_consumer(record);
        self.peers.get_mut(&peer).unwrap().data_consumers.push(id);
        Ok(())
    }

    pub fn list_producers(&self, exclude: PeerId) -> Vec<ProducerSummary> {
        self.media.list_producers(exclude)
    }

    pub fn list_data_producers(
        &self,
        exclude: PeerId,
    ) -> Vec<DataProducerRecord> {
        self.media.list_data_producers(exclude)
    }

    // -- eggs ---------------------------------------------------------

    pub fn eggs_enabled(&self) -> bool {
        self.eggs.is_some()
    }

    pub fn needs_egg_task(&self) -> bool {
        self.eggs.is_some() && self.egg_task.is_none()
    }

    pub fn attach_egg_task(&mut self, handle: JoinHandle<()>) {
        self.egg_task = Some(handle);
    }

    /// Stops the periodic task, if one is running. Abort is synchronous.
    pub fn stop_egg_task(&mut self) {
        if let Some(handle) = self.egg_task.take() {
            handle.abort();
        }
    }

    /// One broadcaster tick: mark a few eggs and announce them. Quiet
    /// when the pool has no unmarked eggs left.
    pub fn tick_eggs(&mut self) {
        let Some(eggs) = self.eggs.as_mut() else {
            return;
        };
        if let Some((marked, remaining_unmarked)) = eggs.tick() {
            tracing::debug!(
                room_id = %self.id,
                count = marked.len(),
                remaining_unmarked,
                "eggs marked"
            );
            self.broadcast(Notification::EggBroadcast {
                room_id: self.id,
                count: marked.len(),
                eggs: marked,
                remaining_unmarked,
            });
        }
    }

    /// A peer claims a marked egg. Exactly one concurrent claimant gets
    /// `true`; that claim credits the peer's equipment and is announced.
    pub fn clear_egg(&mut self, egg_id: EggId, peer: PeerId) -> bool {
        let Some(eggs) = self.eggs.as_mut() else {
            return false;
        };
        let Some(remaining_unmarked) = eggs.clear(egg_id) else {
            return false;
        };
        self.equipment.adjust_eggs(peer, 1);
        self.broadcast(Notification::EggCleared {
            room_id: self.id,
            egg_id,
            cleared_by: peer,
            remaining_unmarked,
        });
        true
    }

    #[cfg(test)]
    pub(crate) fn eggs_mut(&mut self) -> Option<&mut EggBroadcaster> {
        self.eggs.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_protocol::MapKind;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::mpsc;

    fn test_connection() -> ConnectionId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId::new(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    fn garden_options() -> RoomOptions {
        RoomOptions {
            name: "garden".into(),
            map_kind: MapKind::Garden,
            ..RoomOptions::default()
        }
    }

    fn join(
        room: &mut Room,
        name: &str,
        handle: &str,
    ) -> (PeerId, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (id, _) = room.add_peer(
            test_connection(),
            name.to_string(),
            handle.to_string(),
            None,
            UserEquipment::guest(name),
            tx,
        );
        (id, rx)
    }

    #[test]
    fn test_add_peer_assigns_sequential_ids() {
        let mut room = Room::new(RoomId(1), RoomOptions::default());
        let (a, _rx_a) = join(&mut room, "ana", "fox");
        let (b, _rx_b) = join(&mut room, "bo", "owl");
        assert_eq!(a, PeerId(1));
        assert_eq!(b, PeerId(2));
        assert_eq!(room.config.host_peer_id, a);
    }

    #[test]
    fn test_add_peer_reuses_model_handle_per_display_name() {
        let mut room = Room::new(RoomId(1), RoomOptions::default());
        let (first, _rx) = join(&mut room, "ana", "fox");
        room.remove_peer(first);

        let (tx, _rx) = mpsc::unbounded_channel();
        let (_, handle) = room.add_peer(
            test_connection(),
            "ana".into(),
            "owl".into(),
            None,
            UserEquipment::guest("ana"),
            tx,
        );
        assert_eq!(handle, "fox");
    }

    #[test]
    fn test_add_peer_announces_to_existing_peers_only() {
        let mut room = Room::new(RoomId(1), RoomOptions::default());
        let (_, mut rx_a) = join(&mut room, "ana", "fox");
        let (b, mut rx_b) = join(&mut room, "bo", "owl");

        match rx_a.try_recv().unwrap() {
            Notification::PeerJoined { peer_id, .. } => {
                assert_eq!(peer_id, b)
            }
            other => panic!("expected PeerJoined, got {other:?}"),
        }
        // The joiner itself converges from the join snapshot instead.
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_roster_excludes_requested_peer() {
        let mut room = Room::new(RoomId(1), RoomOptions::default());
        let (a, _rx_a) = join(&mut room, "ana", "fox");
        let (b, _rx_b) = join(&mut room, "bo", "owl");

        let roster = room.roster_excluding(b);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].peer_id, a);
    }

    #[test]
    fn test_remove_peer_reassigns_host() {
        let mut room = Room::new(RoomId(1), RoomOptions::default());
        let (host, _rx_a) = join(&mut room, "ana", "fox");
        let (b, _rx_b) = join(&mut room, "bo", "owl");

        let removal = room.remove_peer(host).unwrap();
        assert_eq!(removal.new_host, Some(b));
        assert_eq!(room.config.host_peer_id, b);
    }

    #[test]
    fn test_remove_peer_announces_closed_producers_then_departure() {
        let mut room = Room::new(RoomId(1), RoomOptions::default());
        let (a, _rx_a) = join(&mut room, "ana", "fox");
        let (_b, mut rx_b) = join(&mut room, "bo", "owl");

        room.record_transport(
            a,
            TransportDirection::Producing,
            TransportId("t1".into()),
        )
        .unwrap();
        room.record_producer(a, ProducerId("p1".into()), MediaKind::Audio)
            .unwrap();
        // Drain bo's NewProducer.
        rx_b.try_recv().unwrap();

        let removal = room.remove_peer(a).unwrap();
        assert_eq!(removal.teardown.transports.len(), 1);

        match rx_b.try_recv().unwrap() {
            Notification::ProducerClosed { peer_id, .. } => {
                assert_eq!(peer_id, a)
            }
            other => panic!("expected ProducerClosed, got {other:?}"),
        }
        match rx_b.try_recv().unwrap() {
            Notification::PeerLeft { peer_id, .. } => assert_eq!(peer_id, a),
            other => panic!("expected PeerLeft, got {other:?}"),
        }
    }

    #[test]
    fn test_record_transport_displaces_previous_direction() {
        let mut room = Room::new(RoomId(1), RoomOptions::default());
        let (a, _rx) = join(&mut room, "ana", "fox");

        room.record_transport(
            a,
            TransportDirection::Producing,
            TransportId("t1".into()),
        )
        .unwrap();
        let displaced = room
            .record_transport(
                a,
                TransportDirection::Producing,
                TransportId("t2".into()),
            )
            .unwrap();

        assert_eq!(displaced, Some(TransportId("t1".into())));
        let session = room.peer(a).unwrap();
        assert_eq!(session.transports, vec![TransportId("t2".into())]);
    }

    #[test]
    fn test_record_producer_for_unknown_peer_fails() {
        let mut room = Room::new(RoomId(1), RoomOptions::default());
        let result = room.record_producer(
            PeerId(9),
            ProducerId("p".into()),
            MediaKind::Audio,
        );
        assert_eq!(
            result,
            Err(RoomError::PeerNotFound {
                room: RoomId(1),
                peer: PeerId(9)
            })
        );
    }

    #[test]
    fn test_clear_egg_credits_equipment_and_broadcasts() {
        let mut room = Room::new(RoomId(1), garden_options());
        let (a, mut rx_a) = join(&mut room, "ana", "fox");

        room.eggs_mut().unwrap().mark_all();
        assert!(room.clear_egg(EggId(0), a));
        assert_eq!(room.equipment.get(a).unwrap().egg_count, 1);

        match rx_a.try_recv().unwrap() {
            Notification::EggCleared {
                egg_id, cleared_by, ..
            } => {
                assert_eq!(egg_id, EggId(0));
                assert_eq!(cleared_by, a);
            }
            other => panic!("expected EggCleared, got {other:?}"),
        }
    }

    #[test]
    fn test_clear_egg_loser_gets_false_and_no_broadcast() {
        let mut room = Room::new(RoomId(1), garden_options());
        let (a, mut rx_a) = join(&mut room, "ana", "fox");

        room.eggs_mut().unwrap().mark_all();
        assert!(room.clear_egg(EggId(3), a));
        rx_a.try_recv().unwrap();

        assert!(!room.clear_egg(EggId(3), a));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(room.equipment.get(a).unwrap().egg_count, 1);
    }

    #[test]
    fn test_clear_egg_on_lobby_room_is_false() {
        let mut room = Room::new(RoomId(1), RoomOptions::default());
        let (a, _rx) = join(&mut room, "ana", "fox");
        assert!(!room.clear_egg(EggId(0), a));
    }

    #[test]
    fn test_lobby_room_has_no_eggs() {
        let room = Room::new(RoomId(1), RoomOptions::default());
        assert!(!room.eggs_enabled());
        assert!(!room.needs_egg_task());

        let garden = Room::new(RoomId(2), garden_options());
        assert!(garden.eggs_enabled());
        assert!(garden.needs_egg_task());
    }
}
