//! What a turn produced, and the lifecycle events a session broadcasts.

use ceddy_types::{CloseReason, SessionState, Utterance};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const UNINTELLIGIBLE_NOTICE: &str = "Sorry, I didn't catch that. Could you say it again?";
pub const TRANSCRIPTION_FAILED_NOTICE: &str =
    "Sorry, I'm having trouble hearing you right now. Please try again.";
pub const DISPATCH_FAILED_NOTICE: &str =
    "Sorry, I can't come up with an answer right now. Please try again.";

/// A completed question and answer.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub user: Utterance,
    pub assistant: Utterance,
    /// Synthesized reply audio. `None` when synthesis failed.
    pub audio: Option<Vec<u8>>,
    pub synthesis_error: Option<String>,
    /// Whether the audio reached the session's attached output.
    pub delivered: bool,
}

/// Terminal result of one pass through the pipeline.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Replied(Box<TurnReply>),
    /// An artifact that did not contain the wake phrase.
    NotTriggered,
    /// The wake phrase with nothing after it.
    NoCommand,
    /// The command transcribed to nothing.
    Unintelligible,
    TranscriptionFailed { error: String },
    DispatchFailed { error: String },
    /// The session closed while the turn was in flight. Nothing was recorded.
    Cancelled,
}

impl TurnOutcome {
    pub fn status(&self) -> TurnStatus {
        match self {
            Self::Replied(_) => TurnStatus::Replied,
            Self::NotTriggered => TurnStatus::NotTriggered,
            Self::NoCommand => TurnStatus::NoCommand,
            Self::Unintelligible => TurnStatus::Unintelligible,
            Self::TranscriptionFailed { .. } => TurnStatus::TranscriptionFailed,
            Self::DispatchFailed { .. } => TurnStatus::DispatchFailed,
            Self::Cancelled => TurnStatus::Cancelled,
        }
    }

    /// The message to surface to the user when the turn did not produce a reply.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            Self::Unintelligible => Some(UNINTELLIGIBLE_NOTICE),
            Self::TranscriptionFailed { .. } => Some(TRANSCRIPTION_FAILED_NOTICE),
            Self::DispatchFailed { .. } => Some(DISPATCH_FAILED_NOTICE),
            _ => None,
        }
    }

    pub fn reply(&self) -> Option<&TurnReply> {
        match self {
            Self::Replied(reply) => Some(reply),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Replied,
    NotTriggered,
    NoCommand,
    Unintelligible,
    TranscriptionFailed,
    DispatchFailed,
    Cancelled,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::NotTriggered => "not_triggered",
            Self::NoCommand => "no_command",
            Self::Unintelligible => "unintelligible",
            Self::TranscriptionFailed => "transcription_failed",
            Self::DispatchFailed => "dispatch_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result of handing audio to a session.
#[derive(Debug)]
pub enum FeedOutcome {
    /// Another run owns the session; it will process the queued audio.
    Deferred,
    /// This call ran the pipeline over every queued buffer.
    Processed(Vec<TurnOutcome>),
}

impl FeedOutcome {
    pub fn turns(&self) -> &[TurnOutcome] {
        match self {
            Self::Deferred => &[],
            Self::Processed(turns) => turns,
        }
    }
}

/// Broadcast to session subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        session_id: String,
        from: SessionState,
        to: SessionState,
        at: DateTime<Utc>,
    },
    WakeDetected {
        session_id: String,
    },
    TurnFinished {
        session_id: String,
        status: TurnStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        assistant_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        notice: Option<String>,
    },
    Closed {
        session_id: String,
        reason: CloseReason,
    },
}

impl SessionEvent {
    pub(crate) fn turn_finished(session_id: &str, outcome: &TurnOutcome) -> Self {
        let reply = outcome.reply();
        Self::TurnFinished {
            session_id: session_id.to_string(),
            status: outcome.status(),
            user_text: reply.map(|r| r.user.text.clone()),
            assistant_text: reply.map(|r| r.assistant.text.clone()),
            notice: outcome.notice().map(str::to_string),
        }
    }
}
