//! Session orchestration for Hey Ceddy.
//!
//! Each conversation is a [`SessionStateMachine`] held by the
//! [`SessionRegistry`]. Audio is segmented into utterances, gated on the
//! wake phrase, answered through the [`Pipeline`]'s providers, and the
//! resulting (user, assistant) pair is appended to the session transcript.

pub mod config;
pub mod error;
pub mod machine;
pub mod outcome;
pub mod pump;
pub mod registry;

pub use config::SessionConfig;
pub use error::SessionError;
pub use machine::{Pipeline, SessionStateMachine};
pub use outcome::{
    FeedOutcome, SessionEvent, TurnOutcome, TurnReply, TurnStatus, DISPATCH_FAILED_NOTICE,
    TRANSCRIPTION_FAILED_NOTICE, UNINTELLIGIBLE_NOTICE,
};
pub use pump::spawn_room_pump;
pub use registry::{NewSession, SessionRegistry};
