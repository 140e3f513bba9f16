//! Audio rendering to an output device
//!
//! The renderer owns the device for the length of one `render` call: it
//! opens a stream, pushes gain-adjusted blocks in order, drains, and closes.
//! Concurrent calls on the same renderer queue behind each other.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;

use super::audio::{AudioChunk, AudioFormat, ChunkStream};
use crate::{Error, Result};

/// Frames per device write
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Largest positive 16-bit sample, the peak-normalization target
const PEAK: f32 = 32767.0;

/// PCM sink that can be opened for one playback session
#[async_trait]
pub trait OutputDevice: Send + Sync {
    /// Open a stream in the given format
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the device is unavailable
    async fn open(&self, format: AudioFormat) -> Result<Box<dyn OutputStream>>;

    /// Device name for logging
    fn name(&self) -> String;
}

/// An open playback session; dropping it releases the device
#[async_trait]
pub trait OutputStream: Send {
    /// Queue one block of interleaved samples, waiting while the device is busy
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the device rejected the write
    async fn write(&mut self, block: &[i16]) -> Result<()>;

    /// Wait until everything written has been played
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the device failed while draining
    async fn drain(&mut self) -> Result<()>;
}

/// Per-call rendering options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    /// Linear volume multiplier applied after normalization
    pub gain: f32,
    /// Rescale each chunk so its loudest sample hits full scale
    pub normalize: bool,
    /// Frames per device write
    pub block_size: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            gain: 1.0,
            normalize: false,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Counters for one finished session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub chunks: usize,
    pub samples: usize,
}

/// Plays chunk sequences on one output device, one session at a time
#[derive(Clone)]
pub struct AudioRenderer {
    device: Arc<dyn OutputDevice>,
    session: Arc<Mutex<()>>,
}

impl AudioRenderer {
    /// Create a renderer for a device
    #[must_use]
    pub fn new(device: Arc<dyn OutputDevice>) -> Self {
        Self {
            device,
            session: Arc::new(Mutex::new(())),
        }
    }

    /// Render a chunk sequence to the device
    ///
    /// Peak normalization is computed per chunk, not across the stream, so
    /// loudness can differ between chunks of one utterance.
    ///
    /// # Errors
    ///
    /// Returns the first error yielded by `chunks` unchanged, or
    /// `Error::Playback` if the device fails or a chunk does not match `format`
    pub async fn render(
        &self,
        mut chunks: ChunkStream,
        format: AudioFormat,
        settings: &PlaybackSettings,
    ) -> Result<RenderStats> {
        let _session = self.session.lock().await;

        let mut stream = self.device.open(format).await?;
        tracing::debug!(
            device = %self.device.name(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            gain = settings.gain,
            normalize = settings.normalize,
            "playback session opened"
        );

        let block_len = settings.block_size.max(1) * usize::from(format.channels);
        let mut stats = RenderStats::default();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if chunk.channels != format.channels {
                return Err(Error::Playback(format!(
                    "chunk has {} channels, session expects {}",
                    chunk.channels, format.channels
                )));
            }

            let samples = process_chunk(&chunk, settings.gain, settings.normalize);
            for block in samples.chunks(block_len) {
                stream.write(block).await?;
            }

            stats.chunks += 1;
            stats.samples += samples.len();
        }

        stream.drain().await?;
        drop(stream);

        tracing::debug!(chunks = stats.chunks, samples = stats.samples, "playback complete");
        Ok(stats)
    }

    /// Play one buffer of samples
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_samples(
        &self,
        samples: Vec<i16>,
        format: AudioFormat,
        settings: &PlaybackSettings,
    ) -> Result<RenderStats> {
        let chunk = AudioChunk::new(samples, format.channels);
        let chunks = futures::stream::once(async move { Ok(chunk) }).boxed();
        self.render(chunks, format, settings).await
    }
}

/// Apply optional peak normalization and gain, clamping to the i16 range
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn process_chunk(chunk: &AudioChunk, gain: f32, normalize: bool) -> Vec<i16> {
    let mut scale = gain;
    if normalize {
        let peak = chunk
            .samples
            .iter()
            .map(|&s| i32::from(s).abs())
            .max()
            .unwrap_or(0);
        if peak > 0 {
            scale *= PEAK / peak as f32;
        }
    }

    chunk
        .samples
        .iter()
        .map(|&s| (f32::from(s) * scale).round().clamp(-32768.0, 32767.0) as i16)
        .collect()
}
