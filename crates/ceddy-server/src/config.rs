//! Server configuration loading from file and environment variables.

use ceddy_assistant::{AssistantConfig, ClubBand};
use ceddy_session::SessionConfig;
use ceddy_voice::{LiveKitConfig, SegmenterConfig, SynthesisConfig, TranscriptionConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Wake phrase, idle timeout, and reaper settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Utterance boundary detection.
    #[serde(default)]
    pub segmenter: SegmenterConfig,

    /// Speech-to-text provider.
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Language model used to answer commands.
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Text-to-speech providers.
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// LiveKit room service. Room routes answer 503 while unset.
    #[serde(default)]
    pub livekit: LiveKitConfig,

    /// Distance bands for club suggestions. The built-in table is used when
    /// absent.
    #[serde(default)]
    pub clubs: Option<Vec<ClubBand>>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted audio upload, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "ceddy_session=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_db_path() -> String {
    "ceddy.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CEDDY_HOST` overrides `server.host`
/// - `CEDDY_PORT` overrides `server.port`
/// - `CEDDY_DB_PATH` overrides `database.path`
/// - `CEDDY_LOG_LEVEL` overrides `logging.level`
/// - `CEDDY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CEDDY_WAKE_PHRASE` overrides `session.wake_phrase`
/// - `OPENAI_API_KEY` sets the transcription and assistant keys
/// - `ELEVENLABS_API_KEY` and `ELEVENLABS_VOICE_ID` override the synthesis voice
/// - `LIVEKIT_URL`, `LIVEKIT_API_KEY` and `LIVEKIT_API_SECRET` override `livekit`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies overrides from `lookup`, which maps a variable name to its value.
///
/// Empty values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(host) = var("CEDDY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("CEDDY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("CEDDY_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("CEDDY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CEDDY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(phrase) = var("CEDDY_WAKE_PHRASE") {
        config.session.wake_phrase = phrase;
    }
    if let Some(key) = var("OPENAI_API_KEY") {
        config.transcription.api_key = key.clone();
        config.assistant.api_key = key;
    }
    if let Some(key) = var("ELEVENLABS_API_KEY") {
        config.synthesis.elevenlabs_api_key = Some(key);
    }
    if let Some(voice_id) = var("ELEVENLABS_VOICE_ID") {
        config.synthesis.voice_id = voice_id;
    }
    if let Some(url) = var("LIVEKIT_URL") {
        config.livekit.url = url;
    }
    if let Some(key) = var("LIVEKIT_API_KEY") {
        config.livekit.api_key = key;
    }
    if let Some(secret) = var("LIVEKIT_API_SECRET") {
        config.livekit.api_secret = secret;
    }
}
