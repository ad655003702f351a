//! In-memory signaling channel for tests.
//!
//! [`channel_pair`] returns two linked [`MemoryChannel`]s: frames sent on
//! one side arrive on the other. Handler tests drive a connection without
//! a real socket.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};

use crate::{ConnectionId, SignalChannel, TransportError};

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1_000_000);

/// One end of an in-memory channel pair.
pub struct MemoryChannel {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// Creates a linked pair of in-memory channels.
///
/// Both ends share one [`ConnectionId`], mirroring a real socket.
pub fn channel_pair() -> (MemoryChannel, MemoryChannel) {
    let id =
        ConnectionId::new(NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed));
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryChannel {
            id,
            tx: a_tx,
            rx: Mutex::new(a_rx),
        },
        MemoryChannel {
            id,
            tx: b_tx,
            rx: Mutex::new(b_rx),
        },
    )
}

impl SignalChannel for MemoryChannel {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.tx.send(data.to_vec()).map_err(|_| {
            TransportError::ConnectionClosed("peer end dropped".into())
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.rx.lock().await.close();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_the_pair() {
        let (client, server) = channel_pair();
        client.send(b"ping").await.unwrap();
        let got = server.recv().await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"ping"[..]));

        server.send(b"pong").await.unwrap();
        let got = client.recv().await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"pong"[..]));
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_other_end_dropped() {
        let (client, server) = channel_pair();
        drop(client);
        assert!(server.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_both_ends_share_one_connection_id() {
        let (client, server) = channel_pair();
        assert_eq!(client.id(), server.id());
    }
}
