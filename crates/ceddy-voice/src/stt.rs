//! Speech-to-text providers and the retrying transcription adapter.

use crate::audio::AudioBuffer;
use crate::config::{TranscriptionBackend, TranscriptionConfig};
use crate::error::VoiceError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// How a single provider call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SttProviderError {
    /// Network trouble, throttling, or a 5xx. Worth one more attempt.
    #[error("transient: {0}")]
    Transient(String),
    /// The provider refused the request. Retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The provider heard nothing it could turn into words.
    #[error("unintelligible audio")]
    Unintelligible,
}

/// A speech-to-text backend.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transcribes a complete audio buffer.
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String, SttProviderError>;
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
}

/// OpenAI Whisper over HTTP.
#[derive(Debug, Clone)]
pub struct WhisperApiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    language: String,
}

impl WhisperApiProvider {
    pub fn new(config: &TranscriptionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "{}/audio/transcriptions",
                config.base_url.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperApiProvider {
    fn name(&self) -> &'static str {
        "whisper-api"
    }

    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String, SttProviderError> {
        if self.api_key.is_empty() {
            return Err(SttProviderError::Rejected(
                "OpenAI API key is not configured".to_string(),
            ));
        }

        let (bytes, format) = audio.encoded();
        let file = reqwest::multipart::Part::bytes(bytes)
            .file_name(format!("audio.{}", format.extension()))
            .mime_str(format.mime_type())
            .map_err(|e| SttProviderError::Rejected(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .part("file", file);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SttProviderError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(SttProviderError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SttProviderError::Rejected(format!("HTTP {status}: {body}")));
        }

        let parsed: WhisperResponse = response
            .json()
            .await
            .map_err(|e| SttProviderError::Transient(e.to_string()))?;
        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            return Err(SttProviderError::Unintelligible);
        }
        Ok(text)
    }
}

/// Local whisper.cpp binary fed over stdin.
#[derive(Debug, Clone)]
pub struct WhisperCliProvider {
    model_path: PathBuf,
    binary_path: PathBuf,
}

impl WhisperCliProvider {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperCliProvider {
    fn name(&self) -> &'static str {
        "whisper-cli"
    }

    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String, SttProviderError> {
        let (wav, _) = audio.encoded();
        if wav.len() > MAX_STT_INPUT_BYTES {
            return Err(SttProviderError::Rejected(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                wav.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        // -f - reads from stdin; -nt drops timestamps so stdout is plain text.
        let mut child = Command::new(&self.binary_path)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-nt")
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SttProviderError::Rejected(format!("Failed to spawn STT binary: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SttProviderError::Transient("Failed to open stdin".to_string()))?;
        let write_task = tokio::spawn(async move { stdin.write_all(&wav).await });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SttProviderError::Transient(format!("Failed to read stdout: {e}")))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(SttProviderError::Transient(format!(
                    "Failed to write to stdin: {e}"
                )))
            }
            Err(e) => return Err(SttProviderError::Transient(format!("Stdin task failed: {e}"))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SttProviderError::Transient(format!("STT binary failed: {stderr}")));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() || text == "[BLANK_AUDIO]" {
            return Err(SttProviderError::Unintelligible);
        }
        Ok(text)
    }
}

/// Uniform transcription with a per-attempt timeout and a single retry.
pub struct TranscriptionAdapter {
    provider: Arc<dyn SpeechToText>,
    timeout: Duration,
    retry_backoff: Duration,
}

impl std::fmt::Debug for TranscriptionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionAdapter")
            .field("provider", &self.provider.name())
            .field("timeout", &self.timeout)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl TranscriptionAdapter {
    pub fn new(provider: Arc<dyn SpeechToText>, timeout: Duration, retry_backoff: Duration) -> Self {
        Self {
            provider,
            timeout,
            retry_backoff,
        }
    }

    /// Builds the adapter for the configured backend.
    pub fn from_config(config: &TranscriptionConfig) -> Self {
        let provider: Arc<dyn SpeechToText> = match config.backend {
            TranscriptionBackend::OpenAi => Arc::new(WhisperApiProvider::new(config)),
            TranscriptionBackend::WhisperCli => Arc::new(WhisperCliProvider::new(
                &config.model_path,
                &config.binary_path,
            )),
        };
        Self::new(provider, config.timeout(), config.retry_backoff())
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Transcribes `audio`.
    ///
    /// Unintelligible audio yields `Ok("")`. A transient failure or timeout is
    /// retried once; the second failure is returned as
    /// [`VoiceError::Transcription`].
    pub async fn transcribe(&self, audio: &AudioBuffer) -> Result<String, VoiceError> {
        if audio.is_empty() {
            return Ok(String::new());
        }

        let mut last_error = String::new();
        for attempt in 1..=2u8 {
            let outcome = tokio::time::timeout(self.timeout, self.provider.transcribe(audio)).await;
            let error = match outcome {
                Ok(Ok(text)) => {
                    debug!(provider = self.provider.name(), attempt, "transcribed");
                    return Ok(text);
                }
                Ok(Err(SttProviderError::Unintelligible)) => return Ok(String::new()),
                Ok(Err(SttProviderError::Rejected(msg))) => {
                    return Err(VoiceError::Transcription(format!(
                        "{} rejected the request: {msg}",
                        self.provider.name()
                    )))
                }
                Ok(Err(SttProviderError::Transient(msg))) => msg,
                Err(_) => format!("timed out after {} ms", self.timeout.as_millis()),
            };
            warn!(
                provider = self.provider.name(),
                attempt,
                error = %error,
                "transcription attempt failed"
            );
            last_error = error;
            if attempt == 1 {
                tokio::time::sleep(self.retry_backoff).await;
            }
        }

        Err(VoiceError::Transcription(format!(
            "{} failed after retry: {last_error}",
            self.provider.name()
        )))
    }
}
