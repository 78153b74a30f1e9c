use ceddy_voice::DEFAULT_WAKE_PHRASE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_wake_phrase() -> String {
    DEFAULT_WAKE_PHRASE.to_string()
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_reap_interval_secs() -> u64 {
    30
}

fn default_closed_retention_secs() -> u64 {
    600
}

fn default_event_capacity() -> usize {
    64
}

fn default_wake_check_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_wake_phrase")]
    pub wake_phrase: String,
    /// Leading milliseconds of a buffer transcribed for the wake check.
    /// `0` checks whole buffers.
    #[serde(default = "default_wake_check_ms")]
    pub wake_check_ms: u64,
    /// Seconds without audio before a listening session is closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How often the background reaper looks for idle sessions.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// How long a closed session stays registered, so late audio is
    /// answered with `Closed` rather than `NotFound`.
    #[serde(default = "default_closed_retention_secs")]
    pub closed_retention_secs: u64,
    /// Buffered lifecycle events per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wake_phrase: default_wake_phrase(),
            wake_check_ms: default_wake_check_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            closed_retention_secs: default_closed_retention_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SessionConfig {
    pub fn wake_check_window(&self) -> Option<Duration> {
        (self.wake_check_ms > 0).then(|| Duration::from_millis(self.wake_check_ms))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn closed_retention(&self) -> Duration {
        Duration::from_secs(self.closed_retention_secs)
    }
}
