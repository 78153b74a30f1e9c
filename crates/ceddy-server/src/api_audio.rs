//! Audio ingestion handlers: raw PCM chunks and recorded interactions.

use crate::api::{live_session, ApiError};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Extension, Multipart, Path},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ceddy_session::{FeedOutcome, TurnOutcome, TurnStatus};
use ceddy_types::SessionState;
use serde::Serialize;
use std::sync::Arc;

/// Carries the [`TurnStatus`] of an interaction.
pub const TURN_STATUS_HEADER: HeaderName = HeaderName::from_static("x-ceddy-turn");
/// Carries the user-facing notice of a failed interaction.
pub const TURN_NOTICE_HEADER: HeaderName = HeaderName::from_static("x-ceddy-notice");

/// Multipart field names accepted for the recorded audio.
const AUDIO_FIELDS: [&str; 2] = ["audio_file", "audio"];

/// Summary of one turn, as returned to HTTP clients.
#[derive(Debug, Serialize)]
pub struct TurnView {
    pub status: TurnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    /// Reply audio that was not delivered to an attached stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
}

impl From<&TurnOutcome> for TurnView {
    fn from(outcome: &TurnOutcome) -> Self {
        let reply = outcome.reply();
        Self {
            status: outcome.status(),
            user_text: reply.map(|r| r.user.text.clone()),
            assistant_text: reply.map(|r| r.assistant.text.clone()),
            notice: outcome.notice().map(str::to_string),
            audio_base64: reply
                .filter(|r| !r.delivered)
                .and_then(|r| r.audio.as_deref())
                .map(|audio| BASE64.encode(audio)),
        }
    }
}

/// Response body for `POST /sessions/{session_id}/audio`.
#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub session_id: String,
    pub state: SessionState,
    /// Another request is already draining this session; its turns will
    /// include this chunk's audio.
    pub deferred: bool,
    pub turns: Vec<TurnView>,
}

/// Handler for `POST /sessions/{session_id}/audio`.
///
/// The body is raw 16-bit little-endian mono PCM. Every utterance the chunk
/// completes is run through the pipeline before responding.
pub async fn upload_chunk_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<ChunkResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("audio chunk is empty".to_string()));
    }
    let machine = live_session(&state, &session_id).await?;
    let outcome = machine.feed(&body).await?;

    Ok(Json(ChunkResponse {
        state: machine.state(),
        deferred: matches!(outcome, FeedOutcome::Deferred),
        turns: outcome.turns().iter().map(TurnView::from).collect(),
        session_id,
    }))
}

/// Handler for `POST /sessions/{session_id}/interaction`.
///
/// Accepts one recorded clip as multipart form data and answers with the
/// reply audio. The body is empty when the clip produced no reply; the
/// `x-ceddy-turn` header says why.
pub async fn interaction_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut audio = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name().is_some_and(|name| AUDIO_FIELDS.contains(&name)) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read audio: {}", e)))?;
            audio = Some(bytes);
            break;
        }
    }
    let audio =
        audio.ok_or_else(|| ApiError::BadRequest("missing audio_file field".to_string()))?;
    if audio.is_empty() {
        return Err(ApiError::BadRequest("audio file is empty".to_string()));
    }

    let machine = live_session(&state, &session_id).await?;
    let outcome = machine.process_artifact(audio.to_vec()).await?;
    tracing::debug!(
        session_id = %session_id,
        status = outcome.status().as_str(),
        "interaction processed"
    );

    let audio = outcome
        .reply()
        .and_then(|reply| reply.audio.clone())
        .unwrap_or_default();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(audio_content_type(&audio)),
    );
    headers.insert(
        TURN_STATUS_HEADER,
        HeaderValue::from_static(outcome.status().as_str()),
    );
    if let Some(notice) = outcome.notice() {
        headers.insert(TURN_NOTICE_HEADER, HeaderValue::from_static(notice));
    }
    Ok((headers, audio).into_response())
}

/// The local fallback engine writes WAV; the primary provider returns MP3.
fn audio_content_type(audio: &[u8]) -> &'static str {
    if audio.starts_with(b"RIFF") {
        "audio/wav"
    } else {
        "audio/mpeg"
    }
}
