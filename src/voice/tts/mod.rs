//! Text-to-speech (TTS) backends
//!
//! Each backend turns a validated request into audio for the renderer, or
//! plays it itself and reports `BackendResult::AlreadyPlayed`.

mod cloud;
mod generate;
mod local;
mod piper;
mod streaming;

pub use cloud::{AZURE_OUTPUT_FORMAT, CloudBackend, DEFAULT_AZURE_VOICE};
pub use generate::RemoteGenerateBackend;
pub use local::{CommandSpec, LocalBackend, LocalPipeline};
pub use piper::{OnDeviceBackend, PiperEngine, SpeechEngine};
pub use streaming::{PcmChunker, RemoteStreamingBackend, STREAM_CHUNK_BYTES, StreamingSettings};

use async_trait::async_trait;
use url::Url;

use super::audio::BackendResult;
use super::request::{Backend, SynthesisRequest};
use crate::{Error, Result};

/// A speech synthesis provider
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Which backend this adapter serves
    fn backend(&self) -> Backend;

    /// Synthesize the request's text
    ///
    /// Called only with requests that passed `SynthesisRequest::validate`.
    ///
    /// # Errors
    ///
    /// Returns error if the provider fails or cannot be reached
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<BackendResult>;
}

/// Append a path to a server base URL, keeping any base path
fn endpoint_url(base: &Url, path: &str) -> String {
    format!("{}/{path}", base.as_str().trim_end_matches('/'))
}

/// Turn a non-success HTTP response into a provider error
async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%status, body = %body, "{what} request failed");
    Err(Error::provider(format!("{what} error {status}: {}", body.trim())))
}
