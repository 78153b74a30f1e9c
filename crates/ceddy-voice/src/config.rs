use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_empty_timeout_seconds() -> u32 {
    300
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LiveKitConfig {
    pub url: String,
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
    /// JWT token TTL in seconds for LiveKit join tokens. Default: 3600 (1 hour).
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// Seconds an empty room lingers before LiveKit reclaims it. Default: 300.
    #[serde(default = "default_empty_timeout_seconds")]
    pub empty_timeout_seconds: u32,
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            token_ttl_seconds: default_token_ttl_seconds(),
            empty_timeout_seconds: default_empty_timeout_seconds(),
        }
    }
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("empty_timeout_seconds", &self.empty_timeout_seconds)
            .finish()
    }
}

impl LiveKitConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            ..Self::default()
        }
    }

    /// Token issuing and webhook verification only need the key pair.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// Room management also needs the server URL.
    pub fn is_enabled(&self) -> bool {
        self.has_credentials() && !self.url.is_empty()
    }
}

/// Which speech-to-text backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionBackend {
    /// OpenAI Whisper HTTP API.
    #[default]
    OpenAi,
    /// Local whisper.cpp binary.
    WhisperCli,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_transcription_timeout_ms() -> u64 {
    15_000
}

fn default_retry_backoff_ms() -> u64 {
    250
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub backend: TranscriptionBackend,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// whisper.cpp binary, used by the `whisper_cli` backend.
    #[serde(default)]
    pub binary_path: String,
    /// GGML model file, used by the `whisper_cli` backend.
    #[serde(default)]
    pub model_path: String,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_transcription_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause before the single retry, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            backend: TranscriptionBackend::default(),
            api_key: String::new(),
            base_url: default_openai_base_url(),
            model: default_whisper_model(),
            language: default_language(),
            binary_path: String::new(),
            model_path: String::new(),
            timeout_ms: default_transcription_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("backend", &self.backend)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("language", &self.language)
            .field("binary_path", &self.binary_path)
            .field("model_path", &self.model_path)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

impl TranscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_elevenlabs_base_url() -> String {
    "https://api.elevenlabs.io/v1".to_string()
}

fn default_voice_id() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_elevenlabs_model() -> String {
    "eleven_monolingual_v1".to_string()
}

fn default_voice_setting() -> f32 {
    0.5
}

fn default_fallback_binary() -> String {
    "espeak-ng".to_string()
}

fn default_synthesis_timeout_ms() -> u64 {
    20_000
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// ElevenLabs key. Without it the primary provider is skipped.
    #[serde(default, skip_serializing)]
    pub elevenlabs_api_key: Option<String>,
    #[serde(default = "default_elevenlabs_base_url")]
    pub elevenlabs_base_url: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_elevenlabs_model")]
    pub model_id: String,
    #[serde(default = "default_voice_setting")]
    pub stability: f32,
    #[serde(default = "default_voice_setting")]
    pub similarity_boost: f32,
    /// Local fallback engine.
    #[serde(default = "default_fallback_binary")]
    pub fallback_binary: String,
    /// Per-provider timeout in milliseconds.
    #[serde(default = "default_synthesis_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            elevenlabs_api_key: None,
            elevenlabs_base_url: default_elevenlabs_base_url(),
            voice_id: default_voice_id(),
            model_id: default_elevenlabs_model(),
            stability: default_voice_setting(),
            similarity_boost: default_voice_setting(),
            fallback_binary: default_fallback_binary(),
            timeout_ms: default_synthesis_timeout_ms(),
        }
    }
}

impl fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field(
                "elevenlabs_api_key",
                &self.elevenlabs_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("elevenlabs_base_url", &self.elevenlabs_base_url)
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("stability", &self.stability)
            .field("similarity_boost", &self.similarity_boost)
            .field("fallback_binary", &self.fallback_binary)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
