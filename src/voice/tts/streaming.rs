//! XTTS server streaming synthesis
//!
//! The server answers `/tts_stream` with a WAV body that is produced while the
//! request is open. Bytes are cut into fixed-size PCM chunks as they arrive so
//! playback can start before generation finishes.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{SpeechBackend, endpoint_url, ensure_success};
use crate::voice::audio::{AudioChunk, AudioFormat, AudioSource, BackendResult, ChunkStream};
use crate::voice::request::{Backend, SynthesisRequest};
use crate::{Error, Result};

/// Bytes per streamed chunk (512 mono samples)
pub const STREAM_CHUNK_BYTES: usize = 1024;

/// Give up looking for a WAV `data` chunk after this many bytes
const MAX_HEADER_BYTES: usize = 4096;

/// Generation parameters pushed to the server with `set_tts_settings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub stream_chunk_size: u32,
    pub temperature: f32,
    pub speed: f32,
    pub length_penalty: f32,
    pub repetition_penalty: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub enable_text_splitting: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            stream_chunk_size: 100,
            temperature: 0.75,
            speed: 1.0,
            length_penalty: 1.0,
            repetition_penalty: 5.0,
            top_p: 0.85,
            top_k: 50,
            enable_text_splitting: true,
        }
    }
}

/// Streams raw PCM from an XTTS server
pub struct RemoteStreamingBackend {
    client: Client,
    format: AudioFormat,
    language: String,
}

impl RemoteStreamingBackend {
    /// Create a backend whose stream plays in `format`
    #[must_use]
    pub fn new(client: Client, format: AudioFormat) -> Self {
        Self {
            client,
            format,
            language: "en".to_string(),
        }
    }

    /// Push generation settings to the server
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn update_settings(&self, endpoint: &Url, settings: &StreamingSettings) {
        let url = endpoint_url(endpoint, "set_tts_settings");

        let result = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(settings)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(%url, "TTS settings updated");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::error!(%url, %status, body = %body, "failed to update TTS settings");
            }
            Err(e) => {
                tracing::error!(%url, error = %e, "TTS settings update failed");
            }
        }
    }
}

#[async_trait]
impl SpeechBackend for RemoteStreamingBackend {
    fn backend(&self) -> Backend {
        Backend::RemoteStreaming
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<BackendResult> {
        let url = endpoint_url(request.endpoint()?, "tts_stream");

        let mut query = vec![("text", request.text.as_str())];
        if let Some(voice) = request.voice.as_deref() {
            query.push(("speaker_wav", voice));
        }
        query.push(("language", self.language.as_str()));

        tracing::debug!(%url, "opening TTS stream");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .header("accept", "audio/x-wav")
            .send()
            .await?;
        let response = ensure_success(response, "TTS stream").await?;

        let chunker = PcmChunker::new(STREAM_CHUNK_BYTES, self.format.channels);
        Ok(BackendResult::Audio(AudioSource::Stream {
            format: self.format,
            chunks: chunk_stream(response, chunker),
        }))
    }
}

/// Lazily turn a response body into PCM chunks
fn chunk_stream(response: reqwest::Response, chunker: PcmChunker) -> ChunkStream {
    let bytes = response.bytes_stream().boxed();

    stream::unfold(
        (bytes, Some(chunker), VecDeque::new()),
        |(mut bytes, mut chunker, mut ready)| async move {
            loop {
                if let Some(chunk) = ready.pop_front() {
                    return Some((Ok(chunk), (bytes, chunker, ready)));
                }

                let active = chunker.as_mut()?;
                match bytes.next().await {
                    Some(Ok(data)) => ready.extend(active.push(&data)),
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "TTS stream interrupted");
                        chunker = None;
                        return Some((Err(Error::Network(e)), (bytes, chunker, ready)));
                    }
                    None => ready.extend(chunker.take().and_then(PcmChunker::finish)),
                }
            }
        },
    )
    .boxed()
}

/// Result of looking for the start of PCM data in a WAV stream
#[derive(Debug, PartialEq, Eq)]
enum HeaderScan {
    NeedMore,
    NotWav,
    Data(usize),
}

fn scan_wav_header(buf: &[u8]) -> HeaderScan {
    if buf.len() < 12 {
        return if b"RIFF".starts_with(&buf[..buf.len().min(4)]) {
            HeaderScan::NeedMore
        } else {
            HeaderScan::NotWav
        };
    }
    if &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return HeaderScan::NotWav;
    }

    let mut offset = 12;
    loop {
        let Some(header) = buf.get(offset..offset + 8) else {
            return HeaderScan::NeedMore;
        };
        if &header[0..4] == b"data" {
            return HeaderScan::Data(offset + 8);
        }
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        offset += 8 + size + (size & 1);
    }
}

/// Re-cuts arbitrary byte reads into fixed-size sample chunks
///
/// A leading RIFF/WAVE header is skipped; everything after the `data` chunk
/// header is treated as little-endian 16-bit PCM.
#[derive(Debug)]
pub struct PcmChunker {
    chunk_bytes: usize,
    channels: u16,
    pending: Vec<u8>,
    header_done: bool,
}

impl PcmChunker {
    /// Create a chunker; `chunk_bytes` is rounded down to whole frames
    #[must_use]
    pub fn new(chunk_bytes: usize, channels: u16) -> Self {
        let frame = 2 * usize::from(channels.max(1));
        Self {
            chunk_bytes: (chunk_bytes / frame).max(1) * frame,
            channels,
            pending: Vec::new(),
            header_done: false,
        }
    }

    /// Feed bytes, returning every complete chunk now available
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioChunk> {
        self.pending.extend_from_slice(bytes);

        if !self.header_done {
            match scan_wav_header(&self.pending) {
                HeaderScan::NeedMore if self.pending.len() < MAX_HEADER_BYTES => {
                    return Vec::new();
                }
                HeaderScan::Data(offset) => {
                    self.pending.drain(..offset);
                }
                HeaderScan::NeedMore => {
                    tracing::warn!("no WAV data chunk in stream header, playing bytes as PCM");
                }
                HeaderScan::NotWav => {}
            }
            self.header_done = true;
        }

        let mut chunks = Vec::new();
        while self.pending.len() >= self.chunk_bytes {
            let rest = self.pending.split_off(self.chunk_bytes);
            let full = std::mem::replace(&mut self.pending, rest);
            chunks.push(AudioChunk::from_le_bytes(&full, self.channels));
        }
        chunks
    }

    /// Flush whatever whole frames remain at end of stream
    #[must_use]
    pub fn finish(mut self) -> Option<AudioChunk> {
        if !self.header_done {
            match scan_wav_header(&self.pending) {
                HeaderScan::Data(offset) => {
                    self.pending.drain(..offset);
                }
                HeaderScan::NeedMore => self.pending.clear(),
                HeaderScan::NotWav => {}
            }
        }

        let frame = 2 * usize::from(self.channels.max(1));
        let whole = self.pending.len() / frame * frame;
        if whole == 0 {
            return None;
        }
        Some(AudioChunk::from_le_bytes(&self.pending[..whole], self.channels))
    }
}
