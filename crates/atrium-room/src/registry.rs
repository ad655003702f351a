//! Process-wide room bookkeeping.
//!
//! The registry is the single synchronization point for room and peer
//! lifecycle: handlers lock it, mutate, and carry the returned work
//! (engine closes, store flushes) out of the lock. Room ids come from a
//! process-global counter that only moves forward, so a recreated room
//! never reuses a deleted room's id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use atrium_protocol::{
    JoinResponse, MapKind, PeerId, RoomId, RoomOptions, UserId,
};
use atrium_session::UserEquipment;
use atrium_transport::ConnectionId;
use serde::Serialize;

use crate::{NoticeSender, PeerRemoval, Room, RoomError};

static NEXT_ROOM_ID: AtomicU64 = AtomicU64::new(1);

fn next_room_id() -> RoomId {
    RoomId(NEXT_ROOM_ID.fetch_add(1, Ordering::Relaxed))
}

/// Everything a join needs besides the room resolution itself.
pub struct JoinArgs {
    pub connection: ConnectionId,
    pub display_name: String,
    pub model_handle: String,
    pub user_id: Option<UserId>,
    pub equipment: UserEquipment,
    pub notices: NoticeSender,
}

/// Outcome of a join: the response payload plus whether a room was
/// created (a created garden room still needs its egg task attached).
pub struct JoinOutcome {
    pub response: JoinResponse,
    pub created: bool,
}

/// Outcome of a peer's departure.
pub struct Departure {
    pub room_id: RoomId,
    pub peer_id: PeerId,
    pub removal: PeerRemoval,
    pub room_deleted: bool,
    /// Entries drained at room deletion, beyond the peer's own flush.
    pub remaining_flush: Vec<UserEquipment>,
}

/// Row returned by the out-of-band room listing.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub occupancy: usize,
    pub max_occupancy: usize,
    pub is_private: bool,
    pub map_kind: MapKind,
}

/// All live rooms, plus the connection reverse index used to tear down
/// peers whose socket died without a Leave.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    by_connection: HashMap<ConnectionId, (RoomId, PeerId)>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(&self, id: RoomId) -> Result<&Room, RoomError> {
        self.rooms.get(&id).ok_or(RoomError::RoomNotFound(id))
    }

    pub fn room_mut(&mut self, id: RoomId) -> Result<&mut Room, RoomError> {
        self.rooms.get_mut(&id).ok_or(RoomError::RoomNotFound(id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Joins a peer, resolving or creating the room.
    ///
    /// A missing or unknown `room_id` creates a fresh room with the
    /// given options and makes the joiner its host. With `strict` the
    /// unknown-id case is a terminal NotFound instead, for clients
    /// rejoining by invitation code.
    pub fn join(
        &mut self,
        room_id: Option<RoomId>,
        strict: bool,
        options: Option<RoomOptions>,
        args: JoinArgs,
    ) -> Result<JoinOutcome, RoomError> {
        let (room_id, created) = match room_id {
            Some(id) if self.rooms.contains_key(&id) => (id, false),
            Some(id) if strict => {
                return Err(RoomError::RoomNotFound(id));
            }
            _ => {
                let id = next_room_id();
                let room =
                    Room::new(id, options.unwrap_or_default());
                tracing::info!(room_id = %id, name = %room.config.name, "room created");
                self.rooms.insert(id, room);
                (id, true)
            }
        };

        let room = self.rooms.get_mut(&room_id).unwrap();
        let roster_before = room.roster();
        let (peer_id, model_handle) = room.add_peer(
            args.connection,
            args.display_name,
            args.model_handle,
            args.user_id,
            args.equipment,
            args.notices,
        );
        if created {
            room.config.host_peer_id = peer_id;
        }
        self.by_connection
            .insert(args.connection, (room_id, peer_id));
        tracing::info!(%room_id, %peer_id, "peer joined");

        let room = self.rooms.get(&room_id).unwrap();
        Ok(JoinOutcome {
            response: JoinResponse {
                room_id,
                peer_id,
                peers: roster_before,
                config: room.config.to_options(),
                host_peer_id: room.config.host_peer_id,
                model_handle,
            },
            created,
        })
    }

    /// Removes a peer, deleting the room when it empties. Shared by
    /// explicit Leave and abrupt-disconnect teardown.
    pub fn remove_peer(
        &mut self,
        room_id: RoomId,
        peer_id: PeerId,
    ) -> Result<Departure, RoomError> {
        let room = self.room_mut(room_id)?;
        let removal = room
            .remove_peer(peer_id)
            .ok_or(RoomError::PeerNotFound { room: room_id, peer: peer_id })?;
        self.by_connection.remove(&removal.connection);
        tracing::info!(%room_id, %peer_id, "peer left");

        let room = self.rooms.get_mut(&room_id).unwrap();
        let mut remaining_flush = Vec::new();
        let room_deleted = room.is_empty();
        if room_deleted {
            room.stop_egg_task();
            remaining_flush = room.equipment.drain_for_flush();
            self.rooms.remove(&room_id);
            tracing::info!(%room_id, "room deleted, last peer left");
        }

        Ok(Departure {
            room_id,
            peer_id,
            removal,
            room_deleted,
            remaining_flush,
        })
    }

    /// Resolves the peer bound to a dead connection, if any.
    pub fn peer_for_connection(
        &self,
        connection: ConnectionId,
    ) -> Option<(RoomId, PeerId)> {
        self.by_connection.get(&connection).copied()
    }

    /// Force-deletes a room regardless of occupancy (the out-of-band
    /// DELETE). Every present peer is removed; the accumulated engine
    /// and store work is returned merged.
    pub fn delete_room(
        &mut self,
        room_id: RoomId,
    ) -> Result<Vec<Departure>, RoomError> {
        let room = self.room(room_id)?;
        let peer_ids: Vec<PeerId> =
            room.roster().iter().map(|p| p.peer_id).collect();

        let mut departures = Vec::with_capacity(peer_ids.len());
        for peer_id in peer_ids {
            departures.push(self.remove_peer(room_id, peer_id)?);
        }
        // An occupied room empties through the loop above; an already
        // empty room (unreachable in practice) is dropped directly.
        if let Some(mut room) = self.rooms.remove(&room_id) {
            room.stop_egg_task();
        }
        Ok(departures)
    }

    /// One egg tick for one room. `false` when the room is gone, which
    /// tells the periodic task to exit.
    pub fn tick_room_eggs(&mut self, room_id: RoomId) -> bool {
        match self.rooms.get_mut(&room_id) {
            Some(room) => {
                room.tick_eggs();
                true
            }
            None => false,
        }
    }

    // -- out-of-band queries ------------------------------------------

    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut listed: Vec<RoomSummary> = self
            .rooms
            .values()
            .map(|room| RoomSummary {
                id: room.id,
                name: room.config.name.clone(),
                description: room.config.description.clone(),
                occupancy: room.occupancy(),
                max_occupancy: room.config.max_occupancy,
                is_private: room.config.is_private,
                map_kind: room.config.map_kind,
            })
            .collect();
        listed.sort_by_key(|r| r.id.0);
        listed
    }

    pub fn room_exists(&self, id: RoomId) -> bool {
        self.rooms.contains_key(&id)
    }

    pub fn is_protected(&self, id: RoomId) -> Result<bool, RoomError> {
        Ok(self.room(id)?.config.password.is_some())
    }

    pub fn verify_password(
        &self,
        id: RoomId,
        attempt: &str,
    ) -> Result<bool, RoomError> {
        Ok(self.room(id)?.config.password_matches(attempt))
    }

    pub fn is_full(&self, id: RoomId) -> Result<bool, RoomError> {
        Ok(self.room(id)?.is_full())
    }
}
