//! Session and transcript API handlers.

use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ceddy_db::{
    count_sessions, count_utterances, get_session, list_sessions, list_utterances,
    update_session, DbError, DbPool, UtteranceFilter,
};
use ceddy_session::{NewSession, SessionError, SessionStateMachine};
use ceddy_types::{RoomReference, SessionPatch, SessionRecord, Utterance};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1_000;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// The session exists but has ended.
    #[error("gone: {0}")]
    Gone(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Closed(id) => ApiError::Gone(format!("Session {} has ended", id)),
            SessionError::NotFound(id) => ApiError::NotFound(format!("session not found: {}", id)),
            SessionError::InvalidTransition { from, to } => ApiError::Conflict(format!(
                "invalid state transition from {} to {}",
                from, to
            )),
            SessionError::Store(e) => e.into(),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::SessionNotFound(id) => {
                ApiError::NotFound(format!("session not found: {}", id))
            }
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

/// Runs `f` on a pooled connection off the async runtime.
pub(crate) async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Connection) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;
        f(&conn)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
}

/// Resolves a registered session. A stored session that is no longer live
/// has ended, so it maps to `410 Gone` rather than `404`.
pub(crate) async fn live_session(
    state: &AppState,
    session_id: &str,
) -> Result<Arc<SessionStateMachine>, ApiError> {
    match state.sessions.get(session_id) {
        Ok(machine) => Ok(machine),
        Err(SessionError::NotFound(_)) => {
            let id = session_id.to_string();
            with_conn(&state.pool, move |conn| Ok(get_session(conn, &id)?)).await?;
            Err(SessionError::Closed(session_id.to_string()).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// One page of a listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows matching the query, ignoring paging.
    pub total: i64,
    pub items: Vec<T>,
}

/// Paging query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageParams {
    fn resolve(&self) -> Result<(i64, i64), ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ApiError::BadRequest("offset must not be negative".to_string()));
        }
        Ok((limit, offset))
    }
}

/// Request body for session creation.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: Option<String>,
    /// Room the session's audio arrives through. Requires `participant_identity`.
    pub room_name: Option<String>,
    pub participant_identity: Option<String>,
}

/// Handler for `POST /sessions`.
pub async fn create_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionRecord>), ApiError> {
    let room_reference = match (payload.room_name, payload.participant_identity) {
        (Some(room_name), Some(participant_identity))
            if !room_name.trim().is_empty() && !participant_identity.trim().is_empty() =>
        {
            Some(RoomReference {
                room_name,
                participant_identity,
            })
        }
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "room_name and participant_identity must be given together".to_string(),
            ))
        }
    };

    let machine = state
        .sessions
        .create(NewSession {
            user_id: payload.user_id,
            room_reference,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(machine.snapshot())))
}

/// Handler for `GET /sessions`.
pub async fn list_sessions_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<SessionRecord>>, ApiError> {
    let (limit, offset) = params.resolve()?;
    let page = with_conn(&state.pool, move |conn| {
        Ok(Page {
            total: count_sessions(conn)?,
            items: list_sessions(conn, limit, offset)?,
        })
    })
    .await?;
    Ok(Json(page))
}

/// Handler for `GET /sessions/{session_id}`.
///
/// Live sessions report their in-memory state; ended ones come from storage.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    if let Ok(machine) = state.sessions.get(&session_id) {
        return Ok(Json(machine.snapshot()));
    }
    let record = with_conn(&state.pool, move |conn| Ok(get_session(conn, &session_id)?)).await?;
    Ok(Json(record))
}

/// Handler for `PATCH /sessions/{session_id}`.
///
/// Setting `is_active` to `false` ends the session. An ended session cannot
/// be reactivated.
pub async fn patch_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(patch): Json<SessionPatch>,
) -> Result<Json<SessionRecord>, ApiError> {
    if patch.is_empty() {
        return Err(ApiError::BadRequest("no fields to update".to_string()));
    }

    match state.sessions.get(&session_id) {
        Ok(machine) => {
            machine.apply_patch(&patch).await?;
        }
        Err(SessionError::NotFound(_)) => {
            let id = session_id.clone();
            let stored = with_conn(&state.pool, move |conn| Ok(get_session(conn, &id)?)).await?;
            if patch.is_active == Some(true) && !stored.is_active {
                return Err(SessionError::Closed(session_id).into());
            }
        }
        Err(e) => return Err(e.into()),
    }

    let record = with_conn(&state.pool, move |conn| {
        Ok(update_session(conn, &session_id, &patch, Utc::now())?)
    })
    .await?;
    Ok(Json(record))
}

/// Handler for `DELETE /sessions/{session_id}`.
pub async fn delete_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.sessions.expire(&session_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(SessionError::NotFound(_)) => {
            // Ended and already evicted.
            with_conn(&state.pool, move |conn| Ok(get_session(conn, &session_id)?)).await?;
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => Err(e.into()),
    }
}

/// Query parameters for `GET /transcripts`.
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptParams {
    pub session_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Handler for `GET /transcripts`.
pub async fn list_transcripts_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<TranscriptParams>,
) -> Result<Json<Page<Utterance>>, ApiError> {
    let (limit, offset) = PageParams {
        limit: params.limit,
        offset: params.offset,
    }
    .resolve()?;

    let page = with_conn(&state.pool, move |conn| {
        if let Some(session_id) = &params.session_id {
            get_session(conn, session_id)?;
        }
        let total = count_utterances(conn, params.session_id.as_deref())?;
        let items = list_utterances(
            conn,
            &UtteranceFilter {
                session_id: params.session_id,
                limit: Some(limit),
                offset: Some(offset),
            },
        )?;
        Ok(Page { total, items })
    })
    .await?;
    Ok(Json(page))
}
