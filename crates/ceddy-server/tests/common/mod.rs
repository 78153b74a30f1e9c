#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use ceddy_assistant::{
    AssistantConfig, AssistantError, ChatMessage, ClubTable, FunctionCallRequest,
    FunctionRegistry, LanguageModel, ModelReply, ResponseDispatcher,
};
use ceddy_db::{create_pool, run_migrations, DbRuntimeSettings, SqliteSessionStore};
use ceddy_server::AppState;
use ceddy_session::{Pipeline, SessionConfig, SessionRegistry};
use ceddy_types::{ParticipantInfo, RoomEventKind, RoomInfo, RoomWebhookEvent};
use ceddy_voice::{
    audio::pcm_len_for, AudioBuffer, IssuedToken, RoomManager, SegmenterConfig, SpeechToText,
    SttProviderError, SynthesisAdapter, TextToSpeech, TokenRequest, TranscriptionAdapter,
    VoiceError,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const RATE: u32 = 16_000;
pub const WAKE_MS: u64 = 400;
pub const CLUB_MS: u64 = 600;
pub const REPLY_AUDIO: &[u8] = b"ID3 scripted reply";
pub const VALID_SIGNATURE: &str = "signed-by-livekit";

pub fn tone(ms: u64) -> Vec<u8> {
    let samples = RATE as u64 * ms / 1000;
    (0..samples)
        .flat_map(|i| {
            let s: i16 = if i % 16 < 8 { 8_000 } else { -8_000 };
            s.to_le_bytes()
        })
        .collect()
}

pub fn silence(ms: u64) -> Vec<u8> {
    vec![0u8; pcm_len_for(ms, RATE)]
}

/// Speech segments separated by enough silence to close each buffer.
pub fn utterances(durations: &[u64]) -> Vec<u8> {
    let mut stream = silence(100);
    for &ms in durations {
        stream.extend(tone(ms));
        stream.extend(silence(800));
    }
    stream
}

/// Streamed buffers transcribe by duration; uploaded clips are read as text.
#[derive(Debug)]
struct ScriptedStt;

#[async_trait]
impl SpeechToText for ScriptedStt {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String, SttProviderError> {
        match audio.duration().as_millis() as u64 {
            WAKE_MS => Ok("Hey Ceddy.".to_string()),
            CLUB_MS => Ok("What club for 150 yards?".to_string()),
            _ => std::str::from_utf8(audio.pcm())
                .map(str::to_string)
                .map_err(|_| SttProviderError::Unintelligible),
        }
    }
}

/// Calls `suggest_club` for club questions and echoes anything else.
#[derive(Debug)]
struct GolfModel;

#[async_trait]
impl LanguageModel for GolfModel {
    fn name(&self) -> &'static str {
        "golf"
    }

    async fn respond(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ModelReply, AssistantError> {
        let question = messages
            .iter()
            .rev()
            .find_map(|m| match m {
                ChatMessage::User(text) => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or_default();
        if tools.is_empty() {
            Ok(ModelReply::Text("Go with the 7 Iron.".into()))
        } else if question.contains("club") {
            Ok(ModelReply::FunctionCall(FunctionCallRequest {
                call_id: "call_1".into(),
                name: "suggest_club".into(),
                arguments: json!({ "distance": 150 }),
            }))
        } else {
            Ok(ModelReply::Text(format!("You asked: {question}")))
        }
    }
}

#[derive(Debug)]
struct CannedTts;

#[async_trait]
impl TextToSpeech for CannedTts {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
        Ok(REPLY_AUDIO.to_vec())
    }
}

/// In-memory room service. Webhooks are "signed" when the authorization
/// header equals [`VALID_SIGNATURE`]; the body is `{"event", "room"}`.
#[derive(Debug, Default)]
pub struct FakeRooms {
    rooms: Mutex<Vec<RoomInfo>>,
}

impl FakeRooms {
    pub fn room_names(&self) -> Vec<String> {
        self.rooms
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }
}

#[async_trait]
impl RoomManager for FakeRooms {
    async fn create_room(
        &self,
        name: &str,
        empty_timeout: Option<u32>,
    ) -> Result<RoomInfo, VoiceError> {
        let room = RoomInfo {
            name: name.to_string(),
            sid: format!("RM_{name}"),
            empty_timeout: empty_timeout.unwrap_or(300),
            max_participants: 0,
            num_participants: 0,
            created_at: 1_700_000_000,
            metadata: None,
        };
        self.rooms.lock().unwrap().push(room.clone());
        Ok(room)
    }

    async fn delete_room(&self, name: &str) -> Result<(), VoiceError> {
        let mut rooms = self.rooms.lock().unwrap();
        let before = rooms.len();
        rooms.retain(|r| r.name != name);
        if rooms.len() == before {
            return Err(VoiceError::RoomService(format!("room {name} does not exist")));
        }
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<RoomInfo>, VoiceError> {
        Ok(self.rooms.lock().unwrap().clone())
    }

    async fn list_participants(
        &self,
        _room_name: &str,
    ) -> Result<Vec<ParticipantInfo>, VoiceError> {
        Ok(vec![ParticipantInfo {
            identity: "golfer-1".into(),
            name: Some("Golfer".into()),
            state: Some("active".into()),
            metadata: None,
            joined_at: Some(1_700_000_100),
        }])
    }

    fn issue_token(&self, request: &TokenRequest) -> Result<IssuedToken, VoiceError> {
        let ttl = request.ttl.unwrap_or(Duration::from_secs(3600));
        Ok(IssuedToken {
            token: format!("jwt-for-{}", request.participant_identity),
            url: "wss://range.livekit.test".into(),
            room_name: request.room_name.clone(),
            participant_identity: request.participant_identity.clone(),
            expires_in: ttl.as_secs(),
        })
    }

    fn verify_webhook(
        &self,
        body: &str,
        authorization: &str,
    ) -> Result<RoomWebhookEvent, VoiceError> {
        if authorization != VALID_SIGNATURE {
            return Err(VoiceError::Webhook("signature mismatch".into()));
        }
        let payload: Value =
            serde_json::from_str(body).map_err(|e| VoiceError::Webhook(e.to_string()))?;
        Ok(RoomWebhookEvent {
            kind: RoomEventKind::from_label(payload["event"].as_str().unwrap_or_default()),
            room_name: payload["room"].as_str().map(str::to_string),
            participant_identity: None,
        })
    }
}

pub struct TestServer {
    pub state: AppState,
    pub rooms: Arc<FakeRooms>,
    _dir: TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        Self::build(true)
    }

    pub fn without_rooms() -> Self {
        Self::build(false)
    }

    fn build(rooms_enabled: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ceddy.db");
        let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
        run_migrations(&pool.get().unwrap()).unwrap();

        let pipeline = Arc::new(Pipeline {
            transcriber: Arc::new(TranscriptionAdapter::new(
                Arc::new(ScriptedStt),
                Duration::from_secs(5),
                Duration::from_millis(10),
            )),
            dispatcher: Arc::new(ResponseDispatcher::new(
                Arc::new(GolfModel),
                Arc::new(FunctionRegistry::golf_defaults(ClubTable::default())),
                &AssistantConfig::default(),
            )),
            synthesizer: Arc::new(SynthesisAdapter::new(
                None,
                Arc::new(CannedTts),
                Duration::from_secs(5),
            )),
            store: Arc::new(SqliteSessionStore::new(pool.clone())),
        });
        let rooms = Arc::new(FakeRooms::default());

        let state = AppState {
            pool,
            sessions: Arc::new(SessionRegistry::new(
                pipeline,
                SessionConfig::default(),
                SegmenterConfig::default(),
            )),
            rooms: rooms.clone(),
            rooms_enabled,
            clubs: ClubTable::default(),
            max_upload_bytes: 1024 * 1024,
        };
        Self {
            state,
            rooms,
            _dir: dir,
        }
    }

    pub fn app(&self) -> Router {
        ceddy_server::app(self.state.clone())
    }

    /// Sends `request` and returns the status and JSON body (`Null` if empty).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::delete(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, body)).await
    }

    pub async fn patch_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("PATCH", uri, body)).await
    }

    /// Creates a session and returns its id.
    pub async fn create_session(&self, body: Value) -> String {
        let (status, json) = self.post_json("/sessions", body).await;
        assert_eq!(status, StatusCode::CREATED);
        json["session_id"].as_str().unwrap().to_string()
    }
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A multipart body holding one file field.
pub fn multipart_request(uri: &str, field: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "ceddy-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; \
             filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::post(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}
