//! Shared types for the Ceddy voice golf assistant.
//!
//! This crate holds the data model every other crate speaks: session states
//! and their legal transitions, transcript utterances, function-call records,
//! and the room snapshots handed back by the room provider.
//!
//! It depends on nothing else in the workspace, so any crate can use these
//! types without creating a cycle.

pub mod room;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub use room::{ParticipantInfo, RoomEventKind, RoomInfo, RoomReference, RoomWebhookEvent};

/// Lifecycle state of a conversational session.
///
/// ```text
/// Idle -> Listening -> Capturing -> Processing -> Speaking -> Listening
///   \________________________________________________________-> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no audio received yet.
    Idle,
    /// Receiving audio, waiting for the wake phrase.
    Listening,
    /// Wake phrase heard, accumulating the command.
    Capturing,
    /// Command complete; transcription and response generation running.
    Processing,
    /// Reply being synthesized and delivered.
    Speaking,
    /// Terminal. No further audio is accepted.
    Closed,
}

impl SessionState {
    /// Returns the string label used for persistence and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Capturing => "capturing",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    ///
    /// Besides the main loop, a turn can be abandoned back to `Listening`
    /// from `Capturing` or `Processing`, and every non-terminal state may
    /// move to `Closed`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Listening)
            | (Listening, Capturing)
            | (Capturing, Processing)
            | (Capturing, Listening)
            | (Processing, Speaking)
            | (Processing, Listening)
            | (Speaking, Listening) => true,
            _ => false,
        }
    }

    /// Whether a turn has left capture and is waiting on the assistant or
    /// playing its reply. Busy sessions are never idled out.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Processing | Self::Speaking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state or role label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized label: {0}")]
pub struct ParseLabelError(pub String);

impl FromStr for SessionState {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "listening" => Ok(Self::Listening),
            "capturing" => Ok(Self::Capturing),
            "processing" => Ok(Self::Processing),
            "speaking" => Ok(Self::Speaking),
            "closed" => Ok(Self::Closed),
            other => Err(ParseLabelError(other.to_string())),
        }
    }
}

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ParseLabelError(other.to_string())),
        }
    }
}

/// Record of a domain function the assistant invoked during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRecord {
    pub function_name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
}

/// One completed transcript entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub utterance_id: String,
    pub session_id: String,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallRecord>,
}

impl Utterance {
    /// Creates a new utterance stamped with a fresh id and the current time.
    pub fn new(session_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            utterance_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            text: text.into(),
            created_at: Utc::now(),
            function_call: None,
        }
    }

    pub fn with_function_call(mut self, record: Option<FunctionCallRecord>) -> Self {
        self.function_call = record;
        self
    }
}

/// Persisted view of a session, without its transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: Option<String>,
    pub is_active: bool,
    pub state: SessionState,
    pub room_reference: Option<RoomReference>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata changes accepted for a session. `None` fields are left as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    pub user_id: Option<String>,
    pub is_active: Option<bool>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.is_active.is_none()
    }
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Explicit termination (API call or deactivation).
    Terminated,
    /// No audio for the configured idle duration.
    IdleTimeout,
    /// The attached room ended.
    RoomEnded,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminated => "terminated",
            Self::IdleTimeout => "idle_timeout",
            Self::RoomEnded => "room_ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_loop_edges_are_legal() {
        use SessionState::*;
        let path = [Idle, Listening, Capturing, Processing, Speaking, Listening];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn closed_is_terminal_and_reachable_from_everywhere() {
        use SessionState::*;
        for state in [Idle, Listening, Capturing, Processing, Speaking] {
            assert!(state.can_transition_to(Closed));
            assert!(!Closed.can_transition_to(state));
        }
        assert!(!Closed.can_transition_to(Closed));
    }

    #[test]
    fn skipping_stages_is_rejected() {
        use SessionState::*;
        assert!(!Idle.can_transition_to(Processing));
        assert!(!Listening.can_transition_to(Speaking));
        assert!(!Speaking.can_transition_to(Capturing));
    }

    #[test]
    fn only_processing_and_speaking_are_busy() {
        use SessionState::*;
        assert!(Processing.is_busy());
        assert!(Speaking.is_busy());
        for state in [Idle, Listening, Capturing, Closed] {
            assert!(!state.is_busy(), "{state}");
        }
    }

    #[test]
    fn state_labels_parse_back() {
        for state in [
            SessionState::Idle,
            SessionState::Listening,
            SessionState::Capturing,
            SessionState::Processing,
            SessionState::Speaking,
            SessionState::Closed,
        ] {
            assert_eq!(state.as_str().parse::<SessionState>(), Ok(state));
        }
        assert!("sleeping".parse::<SessionState>().is_err());
    }
}
