//! Transport layer: one logical signaling channel per peer.
//!
//! The orchestrator talks to every participant over exactly one
//! [`SignalChannel`]. The production implementation is WebSocket
//! ([`WsListener`] / [`WsConnection`]); tests use the in-memory
//! [`memory::MemoryChannel`] pair.

#![allow(async_fn_in_trait)]

mod error;
pub mod memory;
mod websocket;

pub use error::TransportError;
pub use websocket::{WsConnection, WsListener};

use std::fmt;

/// Process-unique identifier for a transport-level connection.
///
/// This is the reverse-index key for abrupt-disconnect cleanup: at any
/// moment a `ConnectionId` maps to at most one peer session across the
/// whole room registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A bidirectional message channel to one peer.
///
/// Methods return `impl Future + Send` rather than plain `async fn` so
/// handler tasks generic over the channel stay spawnable.
pub trait SignalChannel: Send + Sync + 'static {
    /// Sends one frame to the peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame. `Ok(None)` means the channel closed
    /// cleanly.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the channel.
    fn close(
        &self,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// The process-unique connection id.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display_and_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "ana");
        map.insert(ConnectionId::new(2), "bo");
        assert_eq!(map[&ConnectionId::new(1)], "ana");
        assert_ne!(ConnectionId::new(1), ConnectionId::new(2));
    }
}
