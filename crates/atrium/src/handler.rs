//! Per-connection signaling handler.
//!
//! Each accepted connection gets its own task running this handler. The
//! loop multiplexes two sources: requests arriving on the channel, and
//! room notifications queued for this peer. Registry bookkeeping happens
//! under the registry lock with no awaits in between; engine and store
//! calls run outside it and their results are recorded afterwards.

use std::sync::Arc;

use atrium_media::{
    ConsumerRecord, DataConsumerRecord, DataProducerRecord, MediaEngine,
    MediaError,
};
use atrium_protocol::{
    codes, ClientRequest, Codec, ConsumerId, DataProducerId, EggId,
    ErrorBody, MediaKind, PeerId, ProducerId, Request, Response,
    ResponseBody, RoomId, RoomOptions, ServerMessage, TransportDirection,
    TransportId,
};
use atrium_room::{spawn_broadcast_task, Departure, JoinArgs, RoomError};
use atrium_session::{Authenticator, EquipmentStore, UserEquipment};
use atrium_transport::{ConnectionId, SignalChannel};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::server::ServerState;
use crate::AtriumError;

type HandlerResult = Result<ResponseBody, ErrorBody>;

/// Drop guard that tears down the connection's peer when the handler
/// exits, covering abrupt disconnects and panics alike. `Drop` is
/// synchronous, so the async cleanup runs in a fire-and-forget task.
struct DisconnectGuard<E, S, A, C>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    connection: ConnectionId,
    state: Arc<ServerState<E, S, A, C>>,
}

impl<E, S, A, C> Drop for DisconnectGuard<E, S, A, C>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let connection = self.connection;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let departure = {
                let mut registry = state.registry.lock().await;
                match registry.peer_for_connection(connection) {
                    Some((room_id, peer_id)) => {
                        registry.remove_peer(room_id, peer_id).ok()
                    }
                    None => None,
                }
            };
            if let Some(departure) = departure {
                tracing::info!(
                    %connection,
                    room_id = %departure.room_id,
                    peer_id = %departure.peer_id,
                    "abrupt disconnect teardown"
                );
                execute_departure(&state, departure).await;
            }
        });
    }
}

/// Handles a single signaling connection from accept to close.
pub(crate) async fn handle_connection<Ch, E, S, A, C>(
    conn: Ch,
    state: Arc<ServerState<E, S, A, C>>,
) -> Result<(), AtriumError>
where
    Ch: SignalChannel,
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // The sender half goes to the room at join time; keeping this clone
    // alive means recv() below never observes a closed channel.
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let mut session: Option<(RoomId, PeerId)> = None;

    let _guard = DisconnectGuard {
        connection: conn_id,
        state: Arc::clone(&state),
    };

    loop {
        tokio::select! {
            incoming = conn.recv() => {
                let data = match incoming {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::debug!(%conn_id, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%conn_id, error = %e, "recv error");
                        break;
                    }
                };

                let request: Request = match state.codec.decode(&data) {
                    Ok(req) => req,
                    Err(e) => {
                        tracing::debug!(
                            %conn_id, error = %e, "failed to decode request"
                        );
                        continue;
                    }
                };

                let response = handle_request(
                    &state, conn_id, &notice_tx, &mut session, request,
                )
                .await;
                let bytes =
                    state.codec.encode(&ServerMessage::Response(response))?;
                conn.send(&bytes).await.map_err(AtriumError::Transport)?;
            }

            note = notice_rx.recv() => {
                // `notice_tx` above outlives the loop, so recv() only
                // yields real notifications.
                if let Some(note) = note {
                    let bytes = state
                        .codec
                        .encode(&ServerMessage::Notification(note))?;
                    conn.send(&bytes).await.map_err(AtriumError::Transport)?;
                }
            }
        }
    }

    // _guard drops here → departure teardown fires if still joined.
    Ok(())
}

/// Dispatches one request and builds the matching response.
async fn handle_request<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    conn_id: ConnectionId,
    notices: &mpsc::UnboundedSender<atrium_protocol::Notification>,
    session: &mut Option<(RoomId, PeerId)>,
    request: Request,
) -> Response
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let id = request.id;
    let result = match request.body {
        ClientRequest::Join {
            room_id,
            config,
            model_handle,
            display_name,
            token,
            strict,
        } => {
            handle_join(
                state, conn_id, notices, session, room_id, config,
                model_handle, display_name, token, strict,
            )
            .await
        }
        ClientRequest::Leave { room_id, peer_id } => {
            handle_leave(state, session, room_id, peer_id).await
        }
        ClientRequest::GetCapabilities => {
            state
                .engine
                .capabilities()
                .await
                .map(|capabilities| ResponseBody::Capabilities {
                    capabilities,
                })
                .map_err(|e| media_error(&e))
        }
        ClientRequest::CreateTransport {
            room_id,
            peer_id,
            direction,
        } => {
            handle_create_transport(state, session, room_id, peer_id, direction)
                .await
        }
        ClientRequest::ConnectTransport {
            room_id,
            peer_id,
            transport_id,
            remote_dtls,
            direction,
        } => {
            handle_connect_transport(
                state, session, room_id, peer_id, transport_id, remote_dtls,
                direction,
            )
            .await
        }
        ClientRequest::Produce {
            room_id,
            peer_id,
            kind,
            media_parameters,
        } => {
            handle_produce(state, session, room_id, peer_id, kind, media_parameters)
                .await
        }
        ClientRequest::ProduceData {
            room_id,
            peer_id,
            label,
            protocol,
            stream_parameters,
        } => {
            handle_produce_data(
                state, session, room_id, peer_id, label, protocol,
                stream_parameters,
            )
            .await
        }
        ClientRequest::Consume {
            room_id,
            peer_id,
            producer_id,
            capabilities,
        } => {
            handle_consume(state, session, room_id, peer_id, producer_id, capabilities)
                .await
        }
        ClientRequest::ConsumeData {
            room_id,
            peer_id,
            data_producer_id,
        } => {
            handle_consume_data(state, session, room_id, peer_id, data_producer_id)
                .await
        }
        ClientRequest::ResumeConsumer { consumer_id } => {
            handle_resume_consumer(state, session, consumer_id).await
        }
        ClientRequest::CloseProducer {
            room_id,
            peer_id,
            producer_id,
        } => {
            handle_close_producer(state, session, room_id, peer_id, producer_id)
                .await
        }
        ClientRequest::CloseDataProducer {
            room_id,
            peer_id,
            data_producer_id,
        } => {
            handle_close_data_producer(
                state, session, room_id, peer_id, data_producer_id,
            )
            .await
        }
        ClientRequest::ListProducers { room_id, peer_id } => {
            handle_list_producers(state, session, room_id, peer_id).await
        }
        ClientRequest::ClearEgg {
            room_id,
            egg_id,
            peer_id,
        } => handle_clear_egg(state, session, room_id, egg_id, peer_id).await,
    };

    match result {
        Ok(body) => Response::ok(id, body),
        Err(error) => Response {
            id,
            ok: None,
            error: Some(error),
        },
    }
}

// ---------------------------------------------------------------------------
// Request handlers
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn handle_join<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    conn_id: ConnectionId,
    notices: &mpsc::UnboundedSender<atrium_protocol::Notification>,
    session: &mut Option<(RoomId, PeerId)>,
    room_id: Option<RoomId>,
    config: Option<RoomOptions>,
    model_handle: String,
    display_name: String,
    token: Option<String>,
    strict: bool,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    if session.is_some() {
        return Err(bad_request("already joined a room"));
    }

    // Opportunistic identity: a missing or rejected token degrades to a
    // guest join instead of failing.
    let user_id = match token.as_deref() {
        Some(token) if !token.is_empty() => {
            match state.auth.identify(token).await {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::debug!(
                        %conn_id, error = %e,
                        "token rejected, joining as guest"
                    );
                    None
                }
            }
        }
        _ => None,
    };

    // A store failure never blocks the join; the peer starts zeroed.
    let equipment = match &user_id {
        Some(user) => match state.store.load(user).await {
            Ok(Some(mut entry)) => {
                entry.display_name = display_name.clone();
                entry
            }
            Ok(None) => {
                UserEquipment::identified(user.clone(), display_name.clone())
            }
            Err(e) => {
                tracing::warn!(
                    %user, error = %e,
                    "equipment load failed, starting zeroed"
                );
                UserEquipment::identified(user.clone(), display_name.clone())
            }
        },
        None => UserEquipment::guest(display_name.clone()),
    };

    let outcome = {
        let mut registry = state.registry.lock().await;
        let outcome = registry
            .join(
                room_id,
                strict,
                config,
                JoinArgs {
                    connection: conn_id,
                    display_name,
                    model_handle,
                    user_id,
                    equipment,
                    notices: notices.clone(),
                },
            )
            .map_err(room_error)?;

        if outcome.created {
            let new_room = outcome.response.room_id;
            if let Ok(room) = registry.room_mut(new_room) {
                if room.needs_egg_task() {
                    let handle = spawn_broadcast_task(
                        Arc::clone(&state.registry),
                        new_room,
                    );
                    room.attach_egg_task(handle);
                }
            }
        }
        outcome
    };

    *session = Some((outcome.response.room_id, outcome.response.peer_id));
    Ok(ResponseBody::Joined(outcome.response))
}

async fn handle_leave<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &mut Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let departure = state
        .registry
        .lock()
        .await
        .remove_peer(room_id, peer_id)
        .map_err(room_error)?;
    *session = None;
    execute_departure(state, departure).await;
    Ok(ResponseBody::Ack)
}

async fn handle_create_transport<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
    direction: TransportDirection,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    // Close-then-replace: an existing transport in this direction is
    // closed at the engine before the replacement is recorded.
    let existing = {
        let mut registry = state.registry.lock().await;
        let room = registry.room_mut(room_id).map_err(room_error)?;
        room.touch(peer_id);
        room.transport_for(peer_id, direction).map(|t| t.id.clone())
    };
    if let Some(old) = &existing {
        if let Err(e) = state.engine.close_transport(old).await {
            tracing::warn!(
                %room_id, %peer_id, transport_id = %old, error = %e,
                "failed to close displaced transport"
            );
        }
    }

    let info = state
        .engine
        .create_transport(direction)
        .await
        .map_err(|e| upstream(room_id, &e))?;

    let displaced = {
        let mut registry = state.registry.lock().await;
        let room = registry.room_mut(room_id).map_err(room_error)?;
        room.record_transport(peer_id, direction, info.id.clone())
            .map_err(room_error)?
    };
    // Normally `displaced` is the transport closed above; anything else
    // means another create raced between our two locks.
    if let Some(old) = displaced {
        if existing.as_ref() != Some(&old) {
            let _ = state.engine.close_transport(&old).await;
        }
    }

    Ok(ResponseBody::TransportCreated {
        transport_id: info.id,
        ice_info: info.ice_info,
        dtls_info: info.dtls_info,
        sctp_info: info.sctp_info,
    })
}

#[allow(clippy::too_many_arguments)]
async fn handle_connect_transport<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
    transport_id: TransportId,
    remote_dtls: Value,
    direction: TransportDirection,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let already_connected = {
        let mut registry = state.registry.lock().await;
        let room = registry.room_mut(room_id).map_err(room_error)?;
        room.touch(peer_id);
        match room.transport(&transport_id) {
            None => {
                return Err(media_error(&MediaError::TransportNotFound(
                    transport_id,
                )));
            }
            Some(record) if record.direction != direction => {
                return Err(bad_request("transport direction mismatch"));
            }
            Some(record) => record.connected,
        }
    };

    // The first handshake is authoritative; repeats are acked without
    // touching the engine again.
    if !already_connected {
        state
            .engine
            .connect_transport(&transport_id, remote_dtls)
            .await
            .map_err(|e| upstream(room_id, &e))?;
        let mut registry = state.registry.lock().await;
        let room = registry.room_mut(room_id).map_err(room_error)?;
        room.mark_transport_connected(&transport_id);
    }

    Ok(ResponseBody::TransportConnected { connected: true })
}

async fn handle_produce<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
    kind: MediaKind,
    media_parameters: Value,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let transport_id = producing_transport(state, room_id, peer_id).await?;
    let producer_id = state
        .engine
        .create_producer(&transport_id, kind, media_parameters)
        .await
        .map_err(|e| upstream(room_id, &e))?;

    let recorded = {
        let mut registry = state.registry.lock().await;
        match registry.room_mut(room_id) {
            Ok(room) => room
                .record_producer(peer_id, producer_id.clone(), kind)
                .map_err(room_error),
            Err(e) => Err(room_error(e)),
        }
    };
    if recorded.is_err() {
        if let Err(e) = state.engine.close_producer(&producer_id).await {
            tracing::warn!(
                %room_id, %producer_id, error = %e,
                "unrecorded producer close failed at engine"
            );
        }
    }
    recorded?;
    Ok(ResponseBody::Produced { producer_id })
}

#[allow(clippy::too_many_arguments)]
async fn handle_produce_data<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
    label: String,
    protocol: String,
    stream_parameters: Value,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let transport_id = producing_transport(state, room_id, peer_id).await?;
    let info = state
        .engine
        .create_data_producer(&transport_id, &label, &protocol, stream_parameters)
        .await
        .map_err(|e| upstream(room_id, &e))?;

    let recorded = {
        let mut registry = state.registry.lock().await;
        match registry.room_mut(room_id) {
            Ok(room) => room
                .record_data_producer(DataProducerRecord {
                    id: info.id.clone(),
                    peer: peer_id,
                    label: label.clone(),
                    protocol: protocol.clone(),
                    stream_id: info.stream_id,
                })
                .map_err(room_error),
            Err(e) => Err(room_error(e)),
        }
    };
    if recorded.is_err() {
        if let Err(e) = state.engine.close_data_producer(&info.id).await {
            tracing::warn!(
                %room_id, data_producer_id = %info.id, error = %e,
                "unrecorded data producer close failed at engine"
            );
        }
    }
    recorded?;

    Ok(ResponseBody::DataProduced {
        data_producer_id: info.id,
        label,
        protocol,
        stream_id: info.stream_id,
    })
}

async fn handle_consume<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
    producer_id: ProducerId,
    capabilities: Value,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let transport_id = {
        let mut registry = state.registry.lock().await;
        let room = registry.room_mut(room_id).map_err(room_error)?;
        room.touch(peer_id);
        if room.producer(&producer_id).is_none() {
            return Err(media_error(&MediaError::ProducerNotFound(
                producer_id,
            )));
        }
        match room.transport_for(peer_id, TransportDirection::Consuming) {
            Some(record) => record.id.clone(),
            None => {
                return Err(media_error(&MediaError::NoTransport(
                    peer_id,
                    TransportDirection::Consuming,
                )));
            }
        }
    };

    // Compatibility gate before any allocation.
    let compatible = state
        .engine
        .can_consume(&producer_id, &capabilities)
        .await
        .map_err(|e| upstream(room_id, &e))?;
    if !compatible {
        return Err(media_error(&MediaError::Incompatible(producer_id)));
    }

    let info = state
        .engine
        .create_consumer(&transport_id, &producer_id, capabilities)
        .await
        .map_err(|e| upstream(room_id, &e))?;

    record_consumer_or_close(
        state,
        room_id,
        ConsumerRecord {
            id: info.id.clone(),
            peer: peer_id,
            producer: producer_id,
            kind: info.kind,
            paused: true,
        },
    )
    .await?;

    Ok(ResponseBody::Consumed {
        consumer_id: info.id,
        kind: info.kind,
        media_parameters: info.media_parameters,
    })
}

/// Records a freshly allocated consumer, closing it at the engine if the
/// room or peer vanished while the allocation was in flight.
async fn record_consumer_or_close<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    room_id: RoomId,
    record: ConsumerRecord,
) -> Result<(), ErrorBody>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let consumer_id = record.id.clone();
    let recorded = {
        let mut registry = state.registry.lock().await;
        match registry.room_mut(room_id) {
            Ok(room) => room.record_consumer(record).map_err(room_error),
            Err(e) => Err(room_error(e)),
        }
    };
    if recorded.is_err() {
        if let Err(e) = state.engine.close_consumer(&consumer_id).await {
            tracing::warn!(
                %room_id, %consumer_id, error = %e,
                "unrecorded consumer close failed at engine"
            );
        }
    }
    recorded
}

async fn handle_consume_data<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
    data_producer_id: DataProducerId,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let transport_id = {
        let mut registry = state.registry.lock().await;
        let room = registry.room_mut(room_id).map_err(room_error)?;
        room.touch(peer_id);
        if room.data_producer(&data_producer_id).is_none() {
            return Err(media_error(&MediaError::DataProducerNotFound(
                data_producer_id,
            )));
        }
        match room.transport_for(peer_id, TransportDirection::Consuming) {
            Some(record) => record.id.clone(),
            None => {
                return Err(media_error(&MediaError::NoTransport(
                    peer_id,
                    TransportDirection::Consuming,
                )));
            }
        }
    };

    let info = state
        .engine
        .create_data_consumer(&transport_id, &data_producer_id)
        .await
        .map_err(|e| upstream(room_id, &e))?;

    let recorded = {
        let mut registry = state.registry.lock().await;
        match registry.room_mut(room_id) {
            Ok(room) => room
                .record_data_consumer(DataConsumerRecord {
                    id: info.id.clone(),
                    peer: peer_id,
                    data_producer: data_producer_id,
                })
                .map_err(room_error),
            Err(e) => Err(room_error(e)),
        }
    };
    if recorded.is_err() {
        if let Err(e) = state.engine.close_data_consumer(&info.id).await {
            tracing::warn!(
                %room_id, data_consumer_id = %info.id, error = %e,
                "unrecorded data consumer close failed at engine"
            );
        }
    }
    recorded?;

    Ok(ResponseBody::DataConsumed {
        data_consumer_id: info.id,
        label: info.label,
        protocol: info.protocol,
        stream_id: info.stream_id,
    })
}

async fn handle_resume_consumer<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    consumer_id: ConsumerId,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let (room_id, peer_id) =
        session.ok_or_else(|| bad_request("not joined"))?;

    {
        let mut registry = state.registry.lock().await;
        let room = registry.room_mut(room_id).map_err(room_error)?;
        room.touch(peer_id);
        match room.consumer(&consumer_id) {
            Some(record) if record.peer == peer_id => {}
            _ => {
                return Err(media_error(&MediaError::ConsumerNotFound(
                    consumer_id,
                )));
            }
        }
    }

    state
        .engine
        .resume_consumer(&consumer_id)
        .await
        .map_err(|e| upstream(room_id, &e))?;

    let mut registry = state.registry.lock().await;
    let room = registry.room_mut(room_id).map_err(room_error)?;
    room.mark_consumer_resumed(&consumer_id);
    Ok(ResponseBody::Resumed { resumed: true })
}

async fn handle_close_producer<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
    producer_id: ProducerId,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let orphans = {
        let mut registry = state.registry.lock().await;
        let room = registry.room_mut(room_id).map_err(room_error)?;
        room.touch(peer_id);
        match room.producer(&producer_id) {
            None => {
                return Err(media_error(&MediaError::ProducerNotFound(
                    producer_id,
                )));
            }
            Some(record) if record.peer != peer_id => {
                return Err(conflict("producer owned by another peer"));
            }
            Some(_) => {}
        }
        room.remove_producer(peer_id, &producer_id).unwrap_or_default()
    };

    if let Err(e) = state.engine.close_producer(&producer_id).await {
        tracing::warn!(
            %room_id, %peer_id, %producer_id, error = %e,
            "producer close failed at engine"
        );
    }
    for orphan in &orphans {
        if let Err(e) = state.engine.close_consumer(&orphan.id).await {
            tracing::warn!(
                %room_id, consumer_id = %orphan.id, error = %e,
                "orphaned consumer close failed at engine"
            );
        }
    }

    Ok(ResponseBody::Ack)
}

async fn handle_close_data_producer<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
    data_producer_id: DataProducerId,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let orphans = {
        let mut registry = state.registry.lock().await;
        let room = registry.room_mut(room_id).map_err(room_error)?;
        room.touch(peer_id);
        match room.data_producer(&data_producer_id) {
            None => {
                return Err(media_error(&MediaError::DataProducerNotFound(
                    data_producer_id,
                )));
            }
            Some(record) if record.peer != peer_id => {
                return Err(conflict(
                    "data producer owned by another peer",
                ));
            }
            Some(_) => {}
        }
        room.remove_data_producer(peer_id, &data_producer_id)
            .unwrap_or_default()
    };

    if let Err(e) = state.engine.close_data_producer(&data_producer_id).await
    {
        tracing::warn!(
            %room_id, %peer_id, %data_producer_id, error = %e,
            "data producer close failed at engine"
        );
    }
    for orphan in &orphans {
        if let Err(e) = state.engine.close_data_consumer(&orphan.id).await {
            tracing::warn!(
                %room_id, data_consumer_id = %orphan.id, error = %e,
                "orphaned data consumer close failed at engine"
            );
        }
    }

    Ok(ResponseBody::Ack)
}

async fn handle_list_producers<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let mut registry = state.registry.lock().await;
    let room = registry.room_mut(room_id).map_err(room_error)?;
    room.touch(peer_id);
    Ok(ResponseBody::Producers {
        producers: room.list_producers(peer_id),
    })
}

async fn handle_clear_egg<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    egg_id: EggId,
    peer_id: PeerId,
) -> HandlerResult
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    require_session(session, room_id, peer_id)?;

    let mut registry = state.registry.lock().await;
    let room = registry.room_mut(room_id).map_err(room_error)?;
    room.touch(peer_id);
    let cleared = room.clear_egg(egg_id, peer_id);
    Ok(ResponseBody::EggCleared { cleared })
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// The peer's producing-direction transport id, or the 400 that says to
/// create one first.
async fn producing_transport<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    room_id: RoomId,
    peer_id: PeerId,
) -> Result<TransportId, ErrorBody>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let mut registry = state.registry.lock().await;
    let room = registry.room_mut(room_id).map_err(room_error)?;
    room.touch(peer_id);
    match room.transport_for(peer_id, TransportDirection::Producing) {
        Some(record) => Ok(record.id.clone()),
        None => Err(media_error(&MediaError::NoTransport(
            peer_id,
            TransportDirection::Producing,
        ))),
    }
}

/// Executes the engine closes and store flushes a departure implies.
/// Failures are logged and never retried.
pub(crate) async fn execute_departure<E, S, A, C>(
    state: &Arc<ServerState<E, S, A, C>>,
    departure: Departure,
) where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    for transport in &departure.removal.teardown.transports {
        if let Err(e) = state.engine.close_transport(transport).await {
            tracing::warn!(
                room_id = %departure.room_id,
                transport_id = %transport,
                error = %e,
                "transport close failed during teardown"
            );
        }
    }

    // Consumers other peers held on the departed producers ride their own
    // surviving transports; the transport closes above never reach them.
    // Closes are idempotent, so the departed peer's own rows (already
    // cascaded) are safe to repeat.
    for consumer in &departure.removal.teardown.consumers {
        if let Err(e) = state.engine.close_consumer(consumer).await {
            tracing::warn!(
                room_id = %departure.room_id,
                consumer_id = %consumer,
                error = %e,
                "consumer close failed during teardown"
            );
        }
    }
    for data_consumer in &departure.removal.teardown.data_consumers {
        if let Err(e) = state.engine.close_data_consumer(data_consumer).await
        {
            tracing::warn!(
                room_id = %departure.room_id,
                data_consumer_id = %data_consumer,
                error = %e,
                "data consumer close failed during teardown"
            );
        }
    }

    let mut flushes: Vec<UserEquipment> =
        departure.removal.flush.into_iter().collect();
    flushes.extend(departure.remaining_flush);
    for entry in &flushes {
        if let Err(e) = state.store.save(entry).await {
            tracing::warn!(
                room_id = %departure.room_id,
                error = %e,
                "equipment flush failed"
            );
        }
    }
}

fn require_session(
    session: &Option<(RoomId, PeerId)>,
    room_id: RoomId,
    peer_id: PeerId,
) -> Result<(), ErrorBody> {
    match session {
        Some((r, p)) if *r == room_id && *p == peer_id => Ok(()),
        Some(_) => Err(bad_request("room/peer does not match this connection")),
        None => Err(bad_request("not joined")),
    }
}

fn bad_request(message: &str) -> ErrorBody {
    ErrorBody {
        code: codes::BAD_REQUEST,
        message: message.to_string(),
    }
}

fn conflict(message: &str) -> ErrorBody {
    ErrorBody {
        code: codes::CONFLICT,
        message: message.to_string(),
    }
}

fn room_error(e: RoomError) -> ErrorBody {
    ErrorBody {
        code: codes::NOT_FOUND,
        message: e.to_string(),
    }
}

/// Maps a media error to its wire code. Upstream details never reach
/// the client.
fn media_error(e: &MediaError) -> ErrorBody {
    let code = match e {
        MediaError::TransportNotFound(_)
        | MediaError::ProducerNotFound(_)
        | MediaError::DataProducerNotFound(_)
        | MediaError::ConsumerNotFound(_)
        | MediaError::DataConsumerNotFound(_) => codes::NOT_FOUND,
        MediaError::NoTransport(..) => codes::BAD_REQUEST,
        MediaError::Incompatible(_) => codes::CAPABILITY,
        MediaError::Upstream(_) => codes::UPSTREAM,
    };
    let message = match e {
        MediaError::Upstream(_) => "media engine failure".to_string(),
        other => other.to_string(),
    };
    ErrorBody { code, message }
}

/// Logs an engine failure with context and returns the generic 500.
fn upstream(room_id: RoomId, e: &MediaError) -> ErrorBody {
    if matches!(e, MediaError::Upstream(_)) {
        tracing::error!(%room_id, error = %e, "media engine failure");
    }
    media_error(e)
}
