use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("LiveKit API error: {0}")]
    LiveKit(#[from] livekit_api::access_token::AccessTokenError),

    #[error("Room service error: {0}")]
    RoomService(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid audio: {0}")]
    Audio(String),

    /// Speech-to-text failed after the adapter's retry budget was spent.
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// Every configured text-to-speech provider failed.
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Webhook rejected: {0}")]
    Webhook(String),

    #[error("Room link closed: {0}")]
    LinkClosed(String),
}
