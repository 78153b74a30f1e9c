use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Ceddy, an AI golf coach helping players during games. \
Suggest golf clubs, analyze environmental conditions, and give concise golf tips. \
Keep answers short enough to be spoken aloud on the course.";

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4-turbo-preview".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_context_window() -> usize {
    20
}

fn default_timeout_ms() -> u64 {
    20_000
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Most recent transcript utterances sent as context.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Per model call, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            context_window: default_context_window(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("context_window", &self.context_window)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl AssistantConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
