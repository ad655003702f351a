//! `AtriumServer` builder and accept loop.
//!
//! Ties the layers together: transport → protocol → media → session →
//! room. One handler task per signaling connection; the out-of-band
//! HTTP surface shares the same state through [`AtriumServer::http_router`].

use std::sync::Arc;

use atrium_media::MediaEngine;
use atrium_protocol::{Codec, JsonCodec};
use atrium_room::RoomRegistry;
use atrium_session::{Authenticator, EquipmentStore};
use atrium_transport::WsListener;
use tokio::sync::Mutex;

use crate::handler::handle_connection;
use crate::AtriumError;

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The
/// registry carries its own `Arc<Mutex<_>>` because the egg broadcast
/// tasks hold a clone of it independently of the rest of the state.
pub(crate) struct ServerState<E, S, A, C> {
    pub(crate) registry: Arc<Mutex<RoomRegistry>>,
    pub(crate) engine: E,
    pub(crate) store: S,
    pub(crate) auth: A,
    pub(crate) codec: C,
}

/// Builder for configuring and starting an Atrium server.
///
/// # Example
///
/// ```rust,ignore
/// let server = AtriumServer::builder()
///     .bind("0.0.0.0:9000")
///     .build(engine, store, auth)
///     .await?;
/// server.run().await
/// ```
pub struct AtriumServerBuilder {
    bind_addr: String,
}

impl AtriumServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
        }
    }

    /// Sets the signaling bind address.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Binds the listener and assembles the server. Uses `JsonCodec`
    /// for the signaling frames.
    pub async fn build<E, S, A>(
        self,
        engine: E,
        store: S,
        auth: A,
    ) -> Result<AtriumServer<E, S, A, JsonCodec>, AtriumError>
    where
        E: MediaEngine,
        S: EquipmentStore,
        A: Authenticator,
    {
        let listener = WsListener::bind(&self.bind_addr).await?;

        let state = Arc::new(ServerState {
            registry: Arc::new(Mutex::new(RoomRegistry::new())),
            engine,
            store,
            auth,
            codec: JsonCodec,
        });

        Ok(AtriumServer { listener, state })
    }
}

impl Default for AtriumServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Atrium server.
///
/// Call [`run()`](Self::run) to start accepting signaling connections.
pub struct AtriumServer<E, S, A, C> {
    listener: WsListener,
    state: Arc<ServerState<E, S, A, C>>,
}

impl<E, S, A, C> AtriumServer<E, S, A, C>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    pub fn builder() -> AtriumServerBuilder {
        AtriumServerBuilder::new()
    }

    /// The local address the signaling listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// The out-of-band HTTP surface, sharing this server's state. Serve
    /// it on whatever address the deployment wants.
    pub fn http_router(&self) -> axum::Router {
        crate::http::router(Arc::clone(&self.state))
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), AtriumError> {
        tracing::info!("atrium server running");

        loop {
            match self.listener.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await
                        {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
