//! Voice infrastructure for Hey Ceddy.
//!
//! Splits incoming PCM into utterances, gates commands behind the wake
//! phrase, and wraps the speech-to-text and text-to-speech providers behind
//! uniform async adapters with their timeout, retry, and fallback policies.
//! Room management (create, token, webhooks) is delegated to LiveKit.

pub mod audio;
pub mod config;
pub mod error;
pub mod link;
pub mod room;
pub mod segmenter;
pub mod stt;
pub mod tts;
pub mod wake;

pub use audio::{AudioBuffer, Boundary, ContainerFormat, Encoding, DEFAULT_SAMPLE_RATE};
pub use config::{LiveKitConfig, SynthesisConfig, TranscriptionBackend, TranscriptionConfig};
pub use error::VoiceError;
pub use link::{AudioSink, RoomAudioLink, TransportEnds, DEFAULT_LINK_CAPACITY};
pub use room::{IssuedToken, LiveKitRoomService, RoomManager, TokenRequest};
pub use segmenter::{SegmenterConfig, Segments, UtteranceSegmenter};
pub use stt::{
    SpeechToText, SttProviderError, TranscriptionAdapter, WhisperApiProvider, WhisperCliProvider,
};
pub use tts::{ElevenLabsProvider, SynthesisAdapter, SystemTtsProvider, TextToSpeech};
pub use wake::{match_wake_phrase, GateDecision, WakeGate, DEFAULT_WAKE_PHRASE};
