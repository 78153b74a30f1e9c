//! Room snapshots returned by the room provider.
//!
//! The core never owns room state. These are read-only copies of what the
//! provider reported at call time.

use serde::{Deserialize, Serialize};

/// A session's association with a live room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomReference {
    pub room_name: String,
    /// Identity the assistant uses inside the room.
    pub participant_identity: String,
}

/// Room as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub name: String,
    pub sid: String,
    /// Seconds an empty room is kept before the provider reclaims it.
    pub empty_timeout: u32,
    pub max_participants: u32,
    pub num_participants: u32,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    pub metadata: Option<String>,
}

/// Participant as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub identity: String,
    pub name: Option<String>,
    pub state: Option<String>,
    pub metadata: Option<String>,
    /// Unix timestamp (seconds).
    pub joined_at: Option<i64>,
}

/// Kind of a verified room webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    RoomStarted,
    RoomFinished,
    ParticipantJoined,
    ParticipantLeft,
    Other(String),
}

impl RoomEventKind {
    pub fn from_label(label: &str) -> Self {
        match label {
            "room_started" => Self::RoomStarted,
            "room_finished" => Self::RoomFinished,
            "participant_joined" => Self::ParticipantJoined,
            "participant_left" => Self::ParticipantLeft,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A webhook event whose signature has been verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomWebhookEvent {
    pub kind: RoomEventKind,
    pub room_name: Option<String>,
    pub participant_identity: Option<String>,
}
