//! PCM audio types shared by backends, normalizer and renderer

use futures::stream::BoxStream;

use crate::{Error, Result};

/// Default sample rate for streamed server audio
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// Lazy, finite sequence of PCM chunks
pub type ChunkStream = BoxStream<'static, Result<AudioChunk>>;

/// Sample rate and channel layout of a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second per channel
    pub sample_rate: u32,
    /// 1 (mono) or 2 (stereo)
    pub channels: u16,
}

impl AudioFormat {
    /// Mono at the given sample rate
    #[must_use]
    pub const fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Create a format, rejecting layouts the renderer cannot play
    ///
    /// # Errors
    ///
    /// Returns error if the sample rate is zero or channels is not 1 or 2
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".to_string()));
        }
        if !matches!(channels, 1 | 2) {
            return Err(Error::Config(format!(
                "unsupported channel count {channels}, expected 1 or 2"
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::mono(DEFAULT_SAMPLE_RATE)
    }
}

/// A bounded run of interleaved signed 16-bit samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub channels: u16,
}

impl AudioChunk {
    #[must_use]
    pub const fn new(samples: Vec<i16>, channels: u16) -> Self {
        Self { samples, channels }
    }

    /// Reinterpret little-endian bytes as samples; a trailing odd byte is dropped
    #[must_use]
    pub fn from_le_bytes(bytes: &[u8], channels: u16) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self { samples, channels }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// One complete decoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub format: AudioFormat,
    pub samples: Vec<i16>,
}

impl AudioBuffer {
    /// Playback length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        let frames = self.samples.len() / usize::from(self.format.channels.max(1));
        frames as f32 / self.format.sample_rate as f32
    }
}

/// Audio produced by a backend, before normalization
pub enum AudioSource {
    /// Whole utterance in one buffer
    Buffer(AudioBuffer),
    /// Incrementally produced chunks in a fixed format
    Stream {
        format: AudioFormat,
        chunks: ChunkStream,
    },
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffer(buffer) => f
                .debug_struct("Buffer")
                .field("format", &buffer.format)
                .field("samples", &buffer.samples.len())
                .finish(),
            Self::Stream { format, .. } => {
                f.debug_struct("Stream").field("format", format).finish_non_exhaustive()
            }
        }
    }
}

/// What a backend hands back to the dispatcher
#[derive(Debug)]
pub enum BackendResult {
    /// Audio for the renderer
    Audio(AudioSource),
    /// The backend played the audio itself
    AlreadyPlayed,
}
