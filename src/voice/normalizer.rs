//! Uniform chunk sequence over single-buffer and streaming backends

use futures::{StreamExt, future, stream};

use super::audio::{AudioChunk, AudioFormat, AudioSource, ChunkStream};

/// Chunk sequence ready for the renderer
pub struct NormalizedAudio {
    pub format: AudioFormat,
    pub chunks: ChunkStream,
}

/// Wrap backend output into one lazy chunk sequence
///
/// A buffer becomes exactly one chunk. Streamed chunks pass through unchanged
/// except that empty ones are dropped with a warning.
#[must_use]
pub fn normalize(source: AudioSource) -> NormalizedAudio {
    match source {
        AudioSource::Buffer(buffer) => {
            let chunk = AudioChunk::new(buffer.samples, buffer.format.channels);
            NormalizedAudio {
                format: buffer.format,
                chunks: stream::once(future::ready(Ok(chunk))).boxed(),
            }
        }
        AudioSource::Stream { format, chunks } => {
            let chunks = chunks
                .filter(|item| {
                    let keep = !matches!(item, Ok(chunk) if chunk.is_empty());
                    if !keep {
                        tracing::warn!("received empty audio chunk, skipping");
                    }
                    future::ready(keep)
                })
                .boxed();
            NormalizedAudio { format, chunks }
        }
    }
}
