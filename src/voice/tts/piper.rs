//! On-device neural synthesis through Piper

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::SpeechBackend;
use crate::voice::audio::{AudioBuffer, AudioChunk, AudioFormat, AudioSource, BackendResult, ChunkStream};
use crate::voice::decode::decode_audio;
use crate::voice::request::{Backend, SynthesisRequest};
use crate::{Error, Result};

/// A synthesizer that runs on this machine and returns one buffer
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Render `text` to PCM
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer>;
}

/// Runs the `piper` CLI against an ONNX voice model
#[derive(Debug, Clone)]
pub struct PiperEngine {
    binary: String,
    model: Option<PathBuf>,
}

impl PiperEngine {
    #[must_use]
    pub const fn new(binary: String, model: Option<PathBuf>) -> Self {
        Self { binary, model }
    }
}

#[async_trait]
impl SpeechEngine for PiperEngine {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Error::provider("no Piper voice model configured"))?;
        let binary = which::which(&self.binary)
            .map_err(|e| Error::provider(format!("`{}` not found: {e}", self.binary)))?;

        let output = tempfile::Builder::new()
            .prefix("tars-piper-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| Error::provider(format!("failed to create piper output file: {e}")))?;

        let mut child = Command::new(&binary)
            .arg("--model")
            .arg(model)
            .arg("--output_file")
            .arg(output.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::provider(format!("failed to start piper: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await.map_err(piper_io)?;
            stdin.write_all(b"\n").await.map_err(piper_io)?;
        }

        let result = child.wait_with_output().await.map_err(piper_io)?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let code = result.status.code().unwrap_or(-1);
            return Err(Error::provider(format!(
                "piper exited with code {code}: {}",
                stderr.trim()
            )));
        }

        let wav = tokio::fs::read(output.path()).await.map_err(piper_io)?;
        let buffer = decode_audio(&wav)?;
        tracing::debug!(
            model = %model.display(),
            seconds = buffer.duration_secs(),
            "piper synthesis complete"
        );
        Ok(buffer)
    }
}

fn piper_io(e: std::io::Error) -> Error {
    Error::provider(format!("piper I/O failed: {e}"))
}

/// Dispatch target for on-device engines
///
/// Text with several sentences is synthesized one sentence at a time: the
/// first is rendered before returning and the rest are produced lazily as the
/// renderer pulls chunks, so playback starts after the first sentence.
pub struct OnDeviceBackend {
    engine: Arc<dyn SpeechEngine>,
}

impl OnDeviceBackend {
    #[must_use]
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl SpeechBackend for OnDeviceBackend {
    fn backend(&self) -> Backend {
        Backend::OnDeviceModel
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<BackendResult> {
        let mut sentences = split_sentences(&request.text);
        let first = sentences
            .pop_front()
            .ok_or_else(|| Error::provider("nothing to synthesize"))?;

        let buffer = self.engine.synthesize(&first).await?;
        if sentences.is_empty() {
            return Ok(BackendResult::Audio(AudioSource::Buffer(buffer)));
        }

        tracing::debug!(sentences = sentences.len() + 1, "pipelining on-device synthesis");

        let format = buffer.format;
        let head = AudioChunk::new(buffer.samples, format.channels);
        let chunks = stream::once(future::ready(Ok(head)))
            .chain(sentence_stream(Arc::clone(&self.engine), sentences, format))
            .boxed();

        Ok(BackendResult::Audio(AudioSource::Stream { format, chunks }))
    }
}

/// Synthesize the remaining sentences in order, one chunk each
fn sentence_stream(
    engine: Arc<dyn SpeechEngine>,
    sentences: VecDeque<String>,
    format: AudioFormat,
) -> ChunkStream {
    stream::unfold((engine, sentences), move |(engine, mut sentences)| async move {
        let sentence = sentences.pop_front()?;
        let chunk = engine.synthesize(&sentence).await.and_then(|buffer| {
            if buffer.format == format {
                Ok(AudioChunk::new(buffer.samples, format.channels))
            } else {
                Err(Error::provider(format!(
                    "engine changed format mid-utterance ({} Hz, {} ch)",
                    buffer.format.sample_rate, buffer.format.channels
                )))
            }
        });
        Some((chunk, (engine, sentences)))
    })
    .boxed()
}

/// Split at whitespace that follows sentence-ending punctuation
fn split_sentences(text: &str) -> VecDeque<String> {
    let mut sentences = VecDeque::new();
    let mut current = String::new();
    let mut after_stop = false;

    for c in text.chars() {
        if after_stop && c.is_whitespace() {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push_back(sentence.to_string());
            }
            current.clear();
            after_stop = false;
            continue;
        }
        after_stop = matches!(c, '.' | '!' | '?');
        current.push(c);
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push_back(tail.to_string());
    }
    sentences
}
