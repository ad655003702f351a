//! The registry's view of one connected peer.

use atrium_protocol::{
    ConsumerId, DataConsumerId, DataProducerId, Notification, PeerId,
    PeerSummary, ProducerId, TransportId, UserId,
};
use atrium_session::unix_millis;
use atrium_transport::ConnectionId;
use tokio::sync::mpsc;

/// Channel a peer's handler task drains to push notifications over its
/// signaling connection.
pub type NoticeSender = mpsc::UnboundedSender<Notification>;

/// One peer's presence in a room.
///
/// The media id lists mirror the room's `MediaTables` rows owned by this
/// peer; the `Room` wrapper methods keep the two views consistent.
#[derive(Debug)]
pub struct PeerSession {
    pub id: PeerId,
    pub connection: ConnectionId,
    pub display_name: String,
    pub model_handle: String,
    /// `None` for guests.
    pub user_id: Option<UserId>,
    pub transports: Vec<TransportId>,
    pub producers: Vec<ProducerId>,
    pub data_producers: Vec<DataProducerId>,
    pub consumers: Vec<ConsumerId>,
    pub data_consumers: Vec<DataConsumerId>,
    pub joined_at_ms: u64,
    pub last_activity_at_ms: u64,
    notices: NoticeSender,
}

impl PeerSession {
    pub fn new(
        id: PeerId,
        connection: ConnectionId,
        display_name: String,
        model_handle: String,
        user_id: Option<UserId>,
        notices: NoticeSender,
    ) -> Self {
        let now = unix_millis();
        Self {
            id,
            connection,
            display_name,
            model_handle,
            user_id,
            transports: Vec::new(),
            producers: Vec::new(),
            data_producers: Vec::new(),
            consumers: Vec::new(),
            data_consumers: Vec::new(),
            joined_at_ms: now,
            last_activity_at_ms: now,
            notices,
        }
    }

    /// Queues a notification for this peer. Returns `false` when the
    /// handler task is gone; the disconnect teardown will catch up.
    pub fn notify(&self, notification: Notification) -> bool {
        self.notices.send(notification).is_ok()
    }

    pub fn touch(&mut self) {
        self.last_activity_at_ms = unix_millis();
    }

    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            peer_id: self.id,
            display_name: self.display_name.clone(),
            model_handle: self.model_handle.clone(),
        }
    }
}
