//! Bidirectional audio channel between a session and a room participant.

use crate::error::VoiceError;
use async_trait::async_trait;
use ceddy_types::RoomReference;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Default number of in-flight audio chunks per direction.
pub const DEFAULT_LINK_CAPACITY: usize = 64;

/// Destination for synthesized reply audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn push_audio(&self, audio: Vec<u8>) -> Result<(), VoiceError>;
}

/// The transport's side of a [`RoomAudioLink`].
///
/// The transport writes participant audio into `inbound` and plays whatever
/// arrives on `outbound`.
#[derive(Debug)]
pub struct TransportEnds {
    pub inbound: mpsc::Sender<Vec<u8>>,
    pub outbound: mpsc::Receiver<Vec<u8>>,
}

/// The session's side of a room audio channel, keyed by room and participant.
#[derive(Debug)]
pub struct RoomAudioLink {
    reference: RoomReference,
    inbound: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl RoomAudioLink {
    /// Opens a link and returns the transport's ends alongside it.
    pub fn open(reference: RoomReference, capacity: usize) -> (Self, TransportEnds) {
        let capacity = capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        info!(
            room = %reference.room_name,
            identity = %reference.participant_identity,
            "room audio link opened"
        );
        (
            Self {
                reference,
                inbound: Mutex::new(Some(inbound_rx)),
                outbound: outbound_tx,
            },
            TransportEnds {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }

    pub fn reference(&self) -> &RoomReference {
        &self.reference
    }

    /// Hands out the inbound audio stream. Only the first caller gets it.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        match self.inbound.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[async_trait]
impl AudioSink for RoomAudioLink {
    async fn push_audio(&self, audio: Vec<u8>) -> Result<(), VoiceError> {
        let len = audio.len();
        self.outbound.send(audio).await.map_err(|_| {
            VoiceError::LinkClosed(format!(
                "room '{}' is no longer receiving audio",
                self.reference.room_name
            ))
        })?;
        debug!(room = %self.reference.room_name, bytes = len, "published reply audio");
        Ok(())
    }
}
