//! PCM audio buffers and helpers.
//!
//! Audio inside the pipeline is 16-bit little-endian mono PCM. Uploaded
//! recordings are the exception: they keep whatever container the client
//! sent. Providers get upload-ready bytes from [`AudioBuffer::encoded`].

use std::time::Duration;

/// Default pipeline sample rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

const BYTES_PER_SAMPLE: usize = 2;

/// What ended a segmented buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Trailing silence reached the configured threshold.
    Silence,
    /// The buffer hit the maximum duration.
    MaxDuration,
    /// The stream ended (explicit flush).
    Flush,
}

/// How the bytes of a buffer are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw 16-bit mono PCM from the segmenter.
    Pcm16,
    /// A complete file in its own container (WAV, MP3, WebM, ...).
    Container,
}

/// Container formats recognised from their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
    WebM,
    Mp4,
}

impl ContainerFormat {
    /// Sniffs the container from a file's magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some(Self::Wav),
            [b'I', b'D', b'3', ..] => Some(Self::Mp3),
            [0xFF, b, ..] if b & 0xE0 == 0xE0 => Some(Self::Mp3),
            [b'O', b'g', b'g', b'S', ..] => Some(Self::Ogg),
            [b'f', b'L', b'a', b'C', ..] => Some(Self::Flac),
            [0x1A, 0x45, 0xDF, 0xA3, ..] => Some(Self::WebM),
            [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some(Self::Mp4),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
            Self::WebM => "webm",
            Self::Mp4 => "m4a",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Ogg => "audio/ogg",
            Self::Flac => "audio/flac",
            Self::WebM => "audio/webm",
            Self::Mp4 => "audio/mp4",
        }
    }
}

/// A finite, completed span of audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pcm: Vec<u8>,
    sample_rate: u32,
    boundary: Boundary,
    encoding: Encoding,
}

impl AudioBuffer {
    pub fn new(pcm: Vec<u8>, sample_rate: u32, boundary: Boundary) -> Self {
        Self {
            pcm,
            sample_rate,
            boundary,
            encoding: Encoding::Pcm16,
        }
    }

    /// Wraps a whole uploaded recording. Its bytes are handed to providers
    /// untouched.
    pub fn artifact(bytes: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            pcm: bytes,
            sample_rate,
            boundary: Boundary::Flush,
            encoding: Encoding::Container,
        }
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    pub fn into_pcm(self) -> Vec<u8> {
        self.pcm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Playback length of PCM buffers. Zero for container uploads, whose
    /// length is unknown without decoding.
    pub fn duration(&self) -> Duration {
        match self.encoding {
            Encoding::Pcm16 => pcm_duration(self.pcm.len(), self.sample_rate),
            Encoding::Container => Duration::ZERO,
        }
    }

    /// The leading `limit` of a PCM buffer, cut on a sample boundary.
    ///
    /// Container uploads and buffers already within the limit come back
    /// whole.
    pub fn head(&self, limit: Duration) -> AudioBuffer {
        let max_len = pcm_len_for(limit.as_millis() as u64, self.sample_rate);
        if self.encoding == Encoding::Container || self.pcm.len() <= max_len {
            return self.clone();
        }
        Self::new(
            self.pcm[..max_len].to_vec(),
            self.sample_rate,
            Boundary::MaxDuration,
        )
    }

    /// Bytes ready to hand to a provider, with the file extension and MIME
    /// type that describe them.
    ///
    /// PCM is framed as WAV. Uploads go out as received; an unrecognised
    /// container is labelled WAV and left for the provider to judge.
    pub fn encoded(&self) -> (Vec<u8>, ContainerFormat) {
        match self.encoding {
            Encoding::Pcm16 => (self.to_wav(), ContainerFormat::Wav),
            Encoding::Container => (
                self.pcm.clone(),
                ContainerFormat::detect(&self.pcm).unwrap_or(ContainerFormat::Wav),
            ),
        }
    }

    /// Frames the PCM samples as a RIFF/WAVE file.
    fn to_wav(&self) -> Vec<u8> {
        let data_len = self.pcm.len() as u32;
        let byte_rate = self.sample_rate * BYTES_PER_SAMPLE as u32;

        let mut wav = Vec::with_capacity(44 + self.pcm.len());
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&1u16.to_le_bytes()); // mono
        wav.extend_from_slice(&self.sample_rate.to_le_bytes());
        wav.extend_from_slice(&byte_rate.to_le_bytes());
        wav.extend_from_slice(&(BYTES_PER_SAMPLE as u16).to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.extend_from_slice(&self.pcm);
        wav
    }
}

/// Duration of `len` bytes of 16-bit mono PCM.
pub fn pcm_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = (len / BYTES_PER_SAMPLE) as u64;
    Duration::from_micros(samples * 1_000_000 / sample_rate as u64)
}

/// Number of bytes in `ms` milliseconds of 16-bit mono PCM.
pub fn pcm_len_for(ms: u64, sample_rate: u32) -> usize {
    (sample_rate as u64 * ms / 1000) as usize * BYTES_PER_SAMPLE
}

/// Root-mean-square energy of a PCM frame, normalized to `0.0..=1.0`.
pub fn frame_energy(frame: &[u8]) -> f32 {
    let samples = frame.len() / BYTES_PER_SAMPLE;
    if samples == 0 {
        return 0.0;
    }
    let sum_squares: f64 = frame
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| {
            let s = i16::from_le_bytes([b[0], b[1]]) as f64 / i16::MAX as f64;
            s * s
        })
        .sum();
    (sum_squares / samples as f64).sqrt() as f32
}
