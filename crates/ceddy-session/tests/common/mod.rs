#![allow(dead_code)]

use async_trait::async_trait;
use ceddy_assistant::{
    AssistantConfig, AssistantError, ChatMessage, ClubTable, FunctionCallRequest,
    FunctionRegistry, LanguageModel, ModelReply, ResponseDispatcher,
};
use ceddy_db::{DbError, SessionStore};
use ceddy_session::{Pipeline, SessionConfig, SessionRegistry};
use ceddy_types::{SessionRecord, SessionState, Utterance};
use ceddy_voice::{
    audio::pcm_len_for, AudioBuffer, Encoding, SegmenterConfig, SpeechToText,
    SttProviderError, SynthesisAdapter, TextToSpeech, TranscriptionAdapter, VoiceError,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const RATE: u32 = 16_000;

/// Durations of the scripted utterances.
pub const WAKE_MS: u64 = 400;
pub const CLUB_MS: u64 = 600;
pub const WIND_MS: u64 = 800;
pub const WAKE_AND_WIND_MS: u64 = 1_000;
pub const MUMBLE_MS: u64 = 1_200;
pub const GARBLED_MS: u64 = 1_400;
/// A long utterance whose first `WAKE_HEAD_MS` carry the wake phrase.
pub const LONG_WAKE_MS: u64 = 1_600;
pub const WAKE_HEAD_MS: u64 = 500;

pub const REPLY_AUDIO: &[u8] = b"ID3 scripted reply";

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

/// Transcribes streamed buffers by their duration and uploaded artifacts by
/// reading their bytes as text.
#[derive(Debug)]
pub struct ScriptedStt {
    by_duration: HashMap<u128, Result<String, SttProviderError>>,
    heard: Mutex<Vec<AudioBuffer>>,
    upload_delay: Duration,
}

impl ScriptedStt {
    pub fn new() -> Self {
        let mut by_duration = HashMap::new();
        let mut say = |ms: u64, text: &str| {
            by_duration.insert(ms as u128, Ok(text.to_string()));
        };
        say(WAKE_MS, "Hey Ceddy.");
        say(CLUB_MS, "What club for 150 yards?");
        say(WIND_MS, "How windy is it?");
        say(WAKE_AND_WIND_MS, "Hey, Ceddy! How windy is it?");
        say(WAKE_HEAD_MS, "Hey Ceddy");
        say(LONG_WAKE_MS, "Hey Ceddy, what club for 150 yards?");
        by_duration.insert(MUMBLE_MS as u128, Err(SttProviderError::Unintelligible));
        by_duration.insert(
            GARBLED_MS as u128,
            Err(SttProviderError::Rejected("unsupported audio".into())),
        );
        Self {
            by_duration,
            heard: Mutex::new(Vec::new()),
            upload_delay: Duration::ZERO,
        }
    }

    /// Uploaded recordings take `delay` to transcribe.
    pub fn with_upload_delay(delay: Duration) -> Self {
        Self {
            upload_delay: delay,
            ..Self::new()
        }
    }

    /// Every buffer handed to the provider, in order.
    pub fn heard(&self) -> Vec<AudioBuffer> {
        self.heard.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String, SttProviderError> {
        self.heard.lock().unwrap().push(audio.clone());
        if audio.encoding() == Encoding::Container && !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        if let Some(scripted) = self.by_duration.get(&audio.duration().as_millis()) {
            return scripted.clone();
        }
        std::str::from_utf8(audio.pcm())
            .map(str::to_string)
            .map_err(|_| SttProviderError::Unintelligible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelMode {
    /// Calls `suggest_club` for club questions, answers everything else.
    Golf,
    /// Never answers.
    Hang,
    Fail,
}

#[derive(Debug)]
pub struct FakeModel {
    mode: ModelMode,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeModel {
    pub fn new(mode: ModelMode) -> Self {
        Self::with_delay(mode, Duration::ZERO)
    }

    pub fn with_delay(mode: ModelMode, delay: Duration) -> Self {
        Self {
            mode,
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Top-level questions asked (follow-ups after a function call excluded).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn respond(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ModelReply, AssistantError> {
        if !tools.is_empty() {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let reply = async {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.mode {
                ModelMode::Hang => std::future::pending().await,
                ModelMode::Fail => Err(AssistantError::Provider("503 from upstream".into())),
                ModelMode::Golf => {
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
        }
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

#[derive(Debug)]
pub struct FakeTts {
    fail: bool,
}

#[async_trait]
impl TextToSpeech for FakeTts {
    fn name(&self) -> &'static str {
        "fake-tts"
    }

    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
        if self.fail {
            Err(VoiceError::Synthesis("speaker offline".into()))
        } else {
            Ok(REPLY_AUDIO.to_vec())
        }
    }
}

/// In-memory [`SessionStore`] with the same rules as the SQLite one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    utterances: Mutex<Vec<Utterance>>,
}

impl MemoryStore {
    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.utterances.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), DbError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn record_state(
        &self,
        session_id: &str,
        state: SessionState,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut sessions = self.sessions.lock().unwrap();
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| DbError::SessionNotFound(session_id.to_string()))?;
        if record.state != SessionState::Closed {
            record.state = state;
            record.is_active = state != SessionState::Closed;
            record.updated_at = updated_at;
        }
        Ok(())
    }

    async fn append_utterances(&self, utterances: &[Utterance]) -> Result<(), DbError> {
        self.utterances
            .lock()
            .unwrap()
            .extend_from_slice(utterances);
        Ok(())
    }
}

pub struct Harness {
    pub registry: SessionRegistry,
    pub model: Arc<FakeModel>,
    pub stt: Arc<ScriptedStt>,
    pub store: Arc<MemoryStore>,
}

pub struct HarnessBuilder {
    model: FakeModel,
    tts_fails: bool,
    upload_delay: Duration,
    config: SessionConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            model: FakeModel::new(ModelMode::Golf),
            tts_fails: false,
            upload_delay: Duration::ZERO,
            config: SessionConfig::default(),
        }
    }

    pub fn model(mut self, model: FakeModel) -> Self {
        self.model = model;
        self
    }

    pub fn failing_tts(mut self) -> Self {
        self.tts_fails = true;
        self
    }

    pub fn slow_uploads(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let model = Arc::new(self.model);
        let stt = Arc::new(ScriptedStt::with_upload_delay(self.upload_delay));
        let pipeline = pipeline_with(stt.clone(), model.clone(), self.tts_fails, store.clone());
        Harness {
            registry: SessionRegistry::new(pipeline, self.config, SegmenterConfig::default()),
            model,
            stt,
            store,
        }
    }
}

pub fn pipeline(
    model: Arc<FakeModel>,
    tts_fails: bool,
    store: Arc<dyn SessionStore>,
) -> Arc<Pipeline> {
    pipeline_with(Arc::new(ScriptedStt::new()), model, tts_fails, store)
}

pub fn pipeline_with(
    stt: Arc<ScriptedStt>,
    model: Arc<FakeModel>,
    tts_fails: bool,
    store: Arc<dyn SessionStore>,
) -> Arc<Pipeline> {
    let registry = Arc::new(FunctionRegistry::golf_defaults(ClubTable::default()));
    Arc::new(Pipeline {
        transcriber: Arc::new(TranscriptionAdapter::new(
            stt,
            Duration::from_secs(5),
            Duration::from_millis(10),
        )),
        dispatcher: Arc::new(ResponseDispatcher::new(
            model,
            registry,
            &AssistantConfig::default(),
        )),
        synthesizer: Arc::new(SynthesisAdapter::new(
            None,
            Arc::new(FakeTts { fail: tts_fails }),
            Duration::from_secs(5),
        )),
        store,
    })
}
