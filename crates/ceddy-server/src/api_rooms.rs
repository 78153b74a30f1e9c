//! LiveKit room management handlers.

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::{header, HeaderMap, StatusCode},
};
use ceddy_types::{ParticipantInfo, RoomEventKind, RoomInfo};
use ceddy_voice::{IssuedToken, TokenRequest, VoiceError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

impl From<VoiceError> for ApiError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::Config(msg) => ApiError::BadRequest(msg),
            VoiceError::Webhook(msg) => ApiError::Unauthorized(msg),
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

fn require_rooms(state: &AppState) -> Result<(), ApiError> {
    if state.rooms_enabled {
        Ok(())
    } else {
        Err(ApiError::ServiceUnavailable(
            "LiveKit is not configured".to_string(),
        ))
    }
}

fn require_name(name: &str, what: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Request body for room creation.
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub room_name: String,
    /// Seconds an empty room lingers. Defaults to the configured value.
    pub empty_timeout: Option<u32>,
}

/// Handler for `POST /rooms`.
pub async fn create_room_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomInfo>), ApiError> {
    require_rooms(&state)?;
    require_name(&payload.room_name, "room_name")?;
    let room = state
        .rooms
        .create_room(&payload.room_name, payload.empty_timeout)
        .await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// Handler for `GET /rooms`.
pub async fn list_rooms_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<RoomInfo>>, ApiError> {
    require_rooms(&state)?;
    Ok(Json(state.rooms.list_rooms().await?))
}

/// Handler for `DELETE /rooms/{room_name}`.
///
/// Sessions attached to the room are closed as well.
pub async fn delete_room_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room_name): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_rooms(&state)?;
    state.rooms.delete_room(&room_name).await?;
    state.sessions.close_room(&room_name).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `GET /rooms/{room_name}/participants`.
pub async fn list_participants_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room_name): Path<String>,
) -> Result<Json<Vec<ParticipantInfo>>, ApiError> {
    require_rooms(&state)?;
    Ok(Json(state.rooms.list_participants(&room_name).await?))
}

/// Request body for a join token.
#[derive(Debug, Deserialize)]
pub struct TokenRequestBody {
    pub room_name: String,
    pub participant_name: String,
    /// Generated when absent.
    pub participant_identity: Option<String>,
    /// Token lifetime in seconds. Defaults to the configured TTL.
    pub ttl: Option<u64>,
    pub metadata: Option<String>,
}

/// Handler for `POST /rooms/token`.
pub async fn token_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<TokenRequestBody>,
) -> Result<Json<IssuedToken>, ApiError> {
    require_rooms(&state)?;
    require_name(&payload.room_name, "room_name")?;
    require_name(&payload.participant_name, "participant_name")?;
    if payload.ttl == Some(0) {
        return Err(ApiError::BadRequest("ttl must be positive".to_string()));
    }

    let participant_identity = payload
        .participant_identity
        .filter(|identity| !identity.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let token = state.rooms.issue_token(&TokenRequest {
        room_name: payload.room_name,
        participant_name: payload.participant_name,
        participant_identity,
        ttl: payload.ttl.map(Duration::from_secs),
        metadata: payload.metadata,
    })?;
    Ok(Json(token))
}

/// Handler for `POST /rooms/webhook`.
///
/// Verifies the signed delivery. A finished room closes its sessions.
pub async fn webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing authorization header".to_string()))?;

    let event = state
        .rooms
        .verify_webhook(&body, authorization)
        .map_err(|e| match e {
            VoiceError::Config(msg) => ApiError::ServiceUnavailable(msg),
            other => {
                tracing::warn!(error = %other, "rejected room webhook");
                other.into()
            }
        })?;

    let closed_sessions = match (&event.kind, &event.room_name) {
        (RoomEventKind::RoomFinished, Some(room_name)) => {
            state.sessions.close_room(room_name).await
        }
        _ => 0,
    };
    tracing::info!(
        kind = ?event.kind,
        room = event.room_name.as_deref().unwrap_or("<none>"),
        closed_sessions,
        "room webhook received"
    );

    Ok(Json(json!({
        "event": event,
        "closed_sessions": closed_sessions
    })))
}
