//! Energy/silence based utterance segmentation.

use crate::audio::{frame_energy, pcm_len_for, AudioBuffer, Boundary, DEFAULT_SAMPLE_RATE};
use serde::{Deserialize, Serialize};

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_frame_ms() -> u64 {
    20
}

fn default_energy_threshold() -> f32 {
    0.01
}

fn default_silence_ms() -> u64 {
    700
}

fn default_max_buffer_ms() -> u64 {
    15_000
}

fn default_min_speech_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Analysis frame length in milliseconds.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
    /// Normalized RMS energy at or above which a frame counts as speech.
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f32,
    /// Trailing silence that completes a buffer.
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    /// Hard cutoff for a single buffer.
    #[serde(default = "default_max_buffer_ms")]
    pub max_buffer_ms: u64,
    /// Buffers with less voiced audio than this are dropped as noise.
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_ms: default_frame_ms(),
            energy_threshold: default_energy_threshold(),
            silence_ms: default_silence_ms(),
            max_buffer_ms: default_max_buffer_ms(),
            min_speech_ms: default_min_speech_ms(),
        }
    }
}

/// Byte lengths derived from a [`SegmenterConfig`].
#[derive(Debug, Clone, Copy)]
struct Limits {
    frame: usize,
    silence: usize,
    max_buffer: usize,
    min_speech: usize,
    threshold: f32,
    sample_rate: u32,
}

impl Limits {
    fn from_config(config: &SegmenterConfig) -> Self {
        let rate = config.sample_rate.max(1);
        let frame = pcm_len_for(config.frame_ms.max(1), rate).max(2);
        Self {
            frame,
            silence: pcm_len_for(config.silence_ms, rate).max(frame),
            max_buffer: pcm_len_for(config.max_buffer_ms, rate).max(frame),
            min_speech: pcm_len_for(config.min_speech_ms, rate),
            threshold: config.energy_threshold,
            sample_rate: rate,
        }
    }
}

/// The buffer currently being accumulated.
#[derive(Debug, Default)]
struct OpenBuffer {
    pcm: Vec<u8>,
    voiced: usize,
    trailing_silence: usize,
}

impl OpenBuffer {
    fn push_frame(&mut self, frame: &[u8], limits: &Limits) -> Option<AudioBuffer> {
        let voiced = frame_energy(frame) >= limits.threshold;
        if self.pcm.is_empty() && !voiced {
            return None;
        }

        self.pcm.extend_from_slice(frame);
        if voiced {
            self.voiced += frame.len();
            self.trailing_silence = 0;
        } else {
            self.trailing_silence += frame.len();
        }

        if self.trailing_silence >= limits.silence {
            self.complete(Boundary::Silence, limits)
        } else if self.pcm.len() >= limits.max_buffer {
            self.complete(Boundary::MaxDuration, limits)
        } else {
            None
        }
    }

    fn complete(&mut self, boundary: Boundary, limits: &Limits) -> Option<AudioBuffer> {
        let OpenBuffer {
            mut pcm,
            voiced,
            trailing_silence,
        } = std::mem::take(self);
        if voiced < limits.min_speech {
            return None;
        }
        pcm.truncate(pcm.len() - trailing_silence);
        Some(AudioBuffer::new(pcm, limits.sample_rate, boundary))
    }
}

/// Splits a continuous PCM stream into completed utterance buffers.
///
/// One segmenter belongs to one session. Bytes that do not yet fill a frame
/// are carried into the next [`feed`](Self::feed).
#[derive(Debug)]
pub struct UtteranceSegmenter {
    limits: Limits,
    carry: Vec<u8>,
    open: OpenBuffer,
}

impl UtteranceSegmenter {
    pub fn new(config: &SegmenterConfig) -> Self {
        Self {
            limits: Limits::from_config(config),
            carry: Vec::new(),
            open: OpenBuffer::default(),
        }
    }

    /// Appends `chunk` and returns the buffers it completes.
    ///
    /// The returned iterator is lazy: frames are classified as it is pulled.
    /// Dropping it early keeps the unread bytes for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Segments<'_> {
        self.carry.extend_from_slice(chunk);
        Segments {
            segmenter: self,
            pos: 0,
        }
    }

    /// Ends the stream: classifies what is left and closes any open buffer.
    pub fn flush(&mut self) -> Vec<AudioBuffer> {
        let mut completed: Vec<_> = self.feed(&[]).collect();
        let limits = self.limits;
        let tail = std::mem::take(&mut self.carry);
        let tail = &tail[..tail.len() & !1];
        if !tail.is_empty() {
            completed.extend(self.open.push_frame(tail, &limits));
        }
        if !self.open.pcm.is_empty() {
            completed.extend(self.open.complete(Boundary::Flush, &limits));
        }
        completed
    }

    /// Discards all buffered audio.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.open = OpenBuffer::default();
    }

    /// Whether speech has started and not yet completed.
    pub fn has_open_buffer(&self) -> bool {
        !self.open.pcm.is_empty()
    }
}

/// Lazy sequence of buffers completed by one [`UtteranceSegmenter::feed`].
#[derive(Debug)]
pub struct Segments<'a> {
    segmenter: &'a mut UtteranceSegmenter,
    pos: usize,
}

impl Iterator for Segments<'_> {
    type Item = AudioBuffer;

    fn next(&mut self) -> Option<AudioBuffer> {
        let UtteranceSegmenter {
            limits,
            carry,
            open,
        } = &mut *self.segmenter;
        while carry.len() - self.pos >= limits.frame {
            let frame = &carry[self.pos..self.pos + limits.frame];
            self.pos += limits.frame;
            if let Some(buffer) = open.push_frame(frame, limits) {
                return Some(buffer);
            }
        }
        None
    }
}

impl Drop for Segments<'_> {
    fn drop(&mut self) {
        self.segmenter.carry.drain(..self.pos);
    }
}
