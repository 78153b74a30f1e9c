//! Wake-phrase detection.

use crate::audio::AudioBuffer;
use crate::stt::TranscriptionAdapter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_WAKE_PHRASE: &str = "Hey Ceddy";

/// Leading audio transcribed when checking a buffer for the wake phrase.
pub const DEFAULT_WAKE_CHECK_WINDOW: Duration = Duration::from_secs(3);

/// Result of [`WakeGate::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The phrase was heard. `remainder` holds any words spoken after it in
    /// the same buffer, already stripped of leading punctuation.
    Triggered {
        transcript: String,
        remainder: Option<String>,
    },
    NotTriggered,
}

impl GateDecision {
    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered { .. })
    }
}

/// Normalized text plus, for each normalized char, the byte offset in the
/// source text just past the char it came from.
fn normalize(text: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(text.len());
    let mut ends = Vec::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        let end = i + c.len_utf8();
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
                ends.push(end);
            }
        } else if c == '\'' || c == '\u{2019}' {
            continue;
        } else if !out.is_empty() && !out.ends_with(' ') {
            out.push(' ');
            ends.push(end);
        }
    }
    if out.ends_with(' ') {
        out.pop();
        ends.pop();
    }
    (out, ends)
}

/// Case-insensitive substring match of `phrase` in `text`, ignoring
/// punctuation and runs of whitespace.
///
/// Returns the text following the phrase (possibly empty) on a match.
pub fn match_wake_phrase(text: &str, phrase: &str) -> Option<String> {
    let (needle, _) = normalize(phrase);
    if needle.is_empty() {
        return None;
    }
    let (haystack, ends) = normalize(text);
    let start = haystack.find(&needle)?;
    let last_char = haystack[..start + needle.len()].chars().count() - 1;
    let end = ends[last_char];
    let remainder = text[end..]
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .trim_end();
    Some(remainder.to_string())
}

/// Gates command processing behind the wake phrase.
///
/// One gate belongs to one session. A trigger opens it for exactly one
/// command; [`take_command`](Self::take_command) closes it again.
#[derive(Debug)]
pub struct WakeGate {
    phrase: String,
    transcriber: Arc<TranscriptionAdapter>,
    check_window: Option<Duration>,
    open: AtomicBool,
}

impl WakeGate {
    pub fn new(phrase: impl Into<String>, transcriber: Arc<TranscriptionAdapter>) -> Self {
        Self {
            phrase: phrase.into(),
            transcriber,
            check_window: Some(DEFAULT_WAKE_CHECK_WINDOW),
            open: AtomicBool::new(false),
        }
    }

    /// Limits the wake check to the leading `window` of each buffer.
    /// `None` checks whole buffers.
    pub fn with_check_window(mut self, window: Option<Duration>) -> Self {
        self.check_window = window.filter(|w| !w.is_zero());
        self
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Transcribes `buffer` and checks it for the wake phrase.
    ///
    /// Only the check window is transcribed at first. A buffer longer than
    /// the window is transcribed in full once the phrase is heard, so a
    /// command spoken in the same breath is not cut short.
    ///
    /// Fails closed: a transcription error or empty transcript never triggers.
    pub async fn evaluate(&self, buffer: &AudioBuffer) -> GateDecision {
        let window = self
            .check_window
            .filter(|window| buffer.duration() > *window);
        let heard = match window {
            Some(window) => self.transcriber.transcribe(&buffer.head(window)).await,
            None => self.transcriber.transcribe(buffer).await,
        };
        let decision = match heard {
            Ok(text) => self.evaluate_text(&text),
            Err(e) => {
                warn!(error = %e, "wake phrase check failed; treating as not triggered");
                return GateDecision::NotTriggered;
            }
        };
        if window.is_none() || !decision.is_triggered() {
            return decision;
        }

        match self.transcriber.transcribe(buffer).await {
            Ok(full) => {
                let remainder = match_wake_phrase(&full, &self.phrase).filter(|r| !r.is_empty());
                GateDecision::Triggered {
                    transcript: full,
                    remainder,
                }
            }
            Err(e) => {
                warn!(error = %e, "full buffer transcription failed; waiting for the next command");
                decision
            }
        }
    }

    /// Checks an existing transcript for the wake phrase.
    pub fn evaluate_text(&self, text: &str) -> GateDecision {
        if text.trim().is_empty() {
            return GateDecision::NotTriggered;
        }
        match match_wake_phrase(text, &self.phrase) {
            Some(remainder) => {
                self.open.store(true, Ordering::SeqCst);
                debug!(phrase = %self.phrase, "wake phrase detected");
                GateDecision::Triggered {
                    transcript: text.to_string(),
                    remainder: (!remainder.is_empty()).then_some(remainder),
                }
            }
            None => GateDecision::NotTriggered,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Consumes the single command the last trigger authorized.
    ///
    /// Returns `false` when the gate was already closed.
    pub fn take_command(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
