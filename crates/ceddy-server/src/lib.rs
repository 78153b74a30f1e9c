//! Hey Ceddy server library logic.

pub mod api;
pub mod api_audio;
pub mod api_golf;
pub mod api_rooms;
pub mod api_stream;
pub mod background;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use ceddy_assistant::{
    AssistantError, ClubTable, FunctionRegistry, OpenAiChatModel, ResponseDispatcher,
};
use ceddy_db::{DbPool, SqliteSessionStore};
use ceddy_session::{Pipeline, SessionRegistry};
use ceddy_voice::{LiveKitRoomService, RoomManager, SynthesisAdapter, TranscriptionAdapter};
use config::Config;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Body limit for everything except audio uploads.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Live sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Room management provider.
    pub rooms: Arc<dyn RoomManager>,
    /// Whether room credentials and URL are configured.
    pub rooms_enabled: bool,
    /// Distance table behind `/suggest-club`.
    pub clubs: ClubTable,
    /// Largest accepted audio upload, in bytes.
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Wires the production providers from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AssistantError::Config` if the configured club table is invalid.
    pub fn from_config(config: &Config, pool: DbPool) -> Result<Self, AssistantError> {
        let clubs = match &config.clubs {
            Some(bands) => ClubTable::new(bands.clone())?,
            None => ClubTable::default(),
        };

        let model = Arc::new(OpenAiChatModel::new(&config.assistant));
        let functions = Arc::new(FunctionRegistry::golf_defaults(clubs.clone()));
        let pipeline = Arc::new(Pipeline {
            transcriber: Arc::new(TranscriptionAdapter::from_config(&config.transcription)),
            dispatcher: Arc::new(ResponseDispatcher::new(model, functions, &config.assistant)),
            synthesizer: Arc::new(SynthesisAdapter::from_config(&config.synthesis)),
            store: Arc::new(SqliteSessionStore::new(pool.clone())),
        });
        let sessions = Arc::new(SessionRegistry::new(
            pipeline,
            config.session.clone(),
            config.segmenter.clone(),
        ));

        let rooms = LiveKitRoomService::new(config.livekit.clone());
        if !rooms.is_enabled() {
            tracing::warn!("livekit is not configured, room routes will answer 503");
        }

        Ok(Self {
            pool,
            sessions,
            rooms_enabled: rooms.is_enabled(),
            rooms: Arc::new(rooms),
            clubs,
            max_upload_bytes: config.server.max_upload_bytes,
        })
    }
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    // Audio uploads get their own, configurable, body limit.
    let audio_routes = Router::new()
        .route(
            "/sessions/{session_id}/audio",
            post(api_audio::upload_chunk_handler),
        )
        .route(
            "/sessions/{session_id}/interaction",
            post(api_audio::interaction_handler),
        )
        .layer(DefaultBodyLimit::max(state.max_upload_bytes));

    Router::new()
        .route("/health", get(health))
        .route(
            "/sessions",
            post(api::create_session_handler).get(api::list_sessions_handler),
        )
        .route(
            "/sessions/{session_id}",
            get(api::get_session_handler)
                .patch(api::patch_session_handler)
                .delete(api::delete_session_handler),
        )
        .route(
            "/sessions/{session_id}/stream",
            get(api_stream::stream_handler),
        )
        .route("/transcripts", get(api::list_transcripts_handler))
        .route(
            "/suggest-club/{distance}",
            get(api_golf::suggest_club_handler),
        )
        .route("/wind-conditions", get(api_golf::wind_conditions_handler))
        .route(
            "/rooms",
            post(api_rooms::create_room_handler).get(api_rooms::list_rooms_handler),
        )
        .route("/rooms/token", post(api_rooms::token_handler))
        .route("/rooms/webhook", post(api_rooms::webhook_handler))
        .route("/rooms/{room_name}", delete(api_rooms::delete_room_handler))
        .route(
            "/rooms/{room_name}/participants",
            get(api_rooms::list_participants_handler),
        )
        .merge(audio_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
