//! Text-to-speech providers and the primary/fallback synthesis adapter.

use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

fn check_input(text: &str) -> Result<(), VoiceError> {
    if text.len() > MAX_TTS_INPUT_BYTES {
        return Err(VoiceError::Synthesis(format!(
            "text exceeds maximum size: {} bytes (limit: {} bytes)",
            text.len(),
            MAX_TTS_INPUT_BYTES
        )));
    }
    Ok(())
}

/// A text-to-speech backend.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn name(&self) -> &'static str;

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError>;
}

/// ElevenLabs HTTP synthesis, returning MP3.
#[derive(Clone)]
pub struct ElevenLabsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    voice_id: String,
    model_id: String,
    stability: f32,
    similarity_boost: f32,
}

impl std::fmt::Debug for ElevenLabsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .finish()
    }
}

impl ElevenLabsProvider {
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.elevenlabs_base_url.trim_end_matches('/').to_string(),
            api_key: config.elevenlabs_api_key.clone().filter(|k| !k.is_empty()),
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
        }
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsProvider {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        check_input(text)?;
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            VoiceError::Config("ElevenLabs API key is not configured".to_string())
        })?;

        let url = format!("{}/text-to-speech/{}", self.base_url, self.voice_id);
        let body = json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": self.stability,
                "similarity_boost": self.similarity_boost,
            },
        });

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("ElevenLabs request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "ElevenLabs returned HTTP {status}: {detail}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("ElevenLabs body read failed: {e}")))?;
        Ok(audio.to_vec())
    }
}

/// The system's native TTS engine (`espeak-ng` by default).
#[derive(Debug, Clone)]
pub struct SystemTtsProvider {
    binary: String,
}

impl SystemTtsProvider {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl TextToSpeech for SystemTtsProvider {
    fn name(&self) -> &'static str {
        "system"
    }

    /// `espeak-ng --stdout` writes a WAV file; it is returned whole so the
    /// caller gets a playable artifact.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        check_input(text)?;

        let output = Command::new(&self.binary)
            .arg("--stdout")
            .arg(text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Synthesis(format!("Failed to spawn {}: {e}", self.binary)))?
            .wait_with_output()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("Failed to wait for {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Synthesis(format!(
                "{} failed: {stderr}",
                self.binary
            )));
        }
        Ok(output.stdout)
    }
}

/// Optional primary provider with a guaranteed fallback.
pub struct SynthesisAdapter {
    primary: Option<Arc<dyn TextToSpeech>>,
    fallback: Arc<dyn TextToSpeech>,
    timeout: Duration,
}

impl std::fmt::Debug for SynthesisAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisAdapter")
            .field("primary", &self.primary.as_ref().map(|p| p.name()))
            .field("fallback", &self.fallback.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SynthesisAdapter {
    pub fn new(
        primary: Option<Arc<dyn TextToSpeech>>,
        fallback: Arc<dyn TextToSpeech>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            timeout,
        }
    }

    /// ElevenLabs when a key is configured, `espeak-ng` always.
    pub fn from_config(config: &SynthesisConfig) -> Self {
        let primary = config
            .elevenlabs_api_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .map(|_| Arc::new(ElevenLabsProvider::new(config)) as Arc<dyn TextToSpeech>);
        Self::new(
            primary,
            Arc::new(SystemTtsProvider::new(&config.fallback_binary)),
            config.timeout(),
        )
    }

    /// Synthesizes `text`, falling back silently when the primary fails.
    ///
    /// Only the failure of both providers is reported.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if let Some(primary) = &self.primary {
            match self.attempt(primary.as_ref(), text).await {
                Ok(audio) => return Ok(audio),
                Err(e) => warn!(
                    provider = primary.name(),
                    error = %e,
                    "primary synthesis failed, using fallback"
                ),
            }
        }

        self.attempt(self.fallback.as_ref(), text)
            .await
            .map_err(|e| VoiceError::Synthesis(format!("all synthesis providers failed: {e}")))
    }

    async fn attempt(&self, provider: &dyn TextToSpeech, text: &str) -> Result<Vec<u8>, VoiceError> {
        let audio = tokio::time::timeout(self.timeout, provider.synthesize(text))
            .await
            .map_err(|_| {
                VoiceError::Synthesis(format!(
                    "{} timed out after {} ms",
                    provider.name(),
                    self.timeout.as_millis()
                ))
            })??;
        if audio.is_empty() {
            return Err(VoiceError::Synthesis(format!(
                "{} returned no audio",
                provider.name()
            )));
        }
        debug!(provider = provider.name(), bytes = audio.len(), "synthesized");
        Ok(audio)
    }
}
