//! Out-of-band HTTP surface.
//!
//! Read-mostly queries a lobby frontend issues before opening a
//! signaling connection, plus the administrative room delete. Shares the
//! server state with the signaling handlers.

use std::sync::Arc;

use atrium_media::MediaEngine;
use atrium_protocol::{Codec, RoomId};
use atrium_room::RoomSummary;
use atrium_session::{Authenticator, EquipmentStore};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::handler::execute_departure;
use crate::server::ServerState;

pub(crate) fn router<E, S, A, C>(
    state: Arc<ServerState<E, S, A, C>>,
) -> Router
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    Router::new()
        .route("/rooms", get(list_rooms))
        .route("/rooms/:id", delete(delete_room))
        .route("/rooms/:id/exists", get(room_exists))
        .route("/rooms/:id/protected", get(room_protected))
        .route("/rooms/:id/password", post(verify_password))
        .route("/rooms/:id/full", get(room_full))
        .with_state(state)
}

async fn list_rooms<E, S, A, C>(
    State(state): State<Arc<ServerState<E, S, A, C>>>,
) -> Json<Vec<RoomSummary>>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    Json(state.registry.lock().await.list_rooms())
}

async fn room_exists<E, S, A, C>(
    State(state): State<Arc<ServerState<E, S, A, C>>>,
    Path(id): Path<u64>,
) -> Json<Value>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let exists = state.registry.lock().await.room_exists(RoomId(id));
    Json(json!({ "exists": exists }))
}

async fn room_protected<E, S, A, C>(
    State(state): State<Arc<ServerState<E, S, A, C>>>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, StatusCode>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let protected = state
        .registry
        .lock()
        .await
        .is_protected(RoomId(id))
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "protected": protected })))
}

#[derive(Debug, Deserialize)]
struct PasswordAttempt {
    password: String,
}

async fn verify_password<E, S, A, C>(
    State(state): State<Arc<ServerState<E, S, A, C>>>,
    Path(id): Path<u64>,
    Json(attempt): Json<PasswordAttempt>,
) -> Result<Json<Value>, StatusCode>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let valid = state
        .registry
        .lock()
        .await
        .verify_password(RoomId(id), &attempt.password)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "valid": valid })))
}

async fn room_full<E, S, A, C>(
    State(state): State<Arc<ServerState<E, S, A, C>>>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, StatusCode>
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let full = state
        .registry
        .lock()
        .await
        .is_full(RoomId(id))
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "full": full })))
}

async fn delete_room<E, S, A, C>(
    State(state): State<Arc<ServerState<E, S, A, C>>>,
    Path(id): Path<u64>,
) -> StatusCode
where
    E: MediaEngine,
    S: EquipmentStore,
    A: Authenticator,
    C: Codec + Send + Sync + 'static,
{
    let departures = {
        let mut registry = state.registry.lock().await;
        match registry.delete_room(RoomId(id)) {
            Ok(departures) => departures,
            Err(_) => return StatusCode::NOT_FOUND,
        }
    };
    tracing::info!(room_id = %RoomId(id), "room deleted via admin surface");
    for departure in departures {
        execute_departure(&state, departure).await;
    }
    StatusCode::NO_CONTENT
}
