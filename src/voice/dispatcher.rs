//! Backend selection and the synthesize-then-play flow

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use super::audio::BackendResult;
use super::device::CpalOutputDevice;
use super::normalizer::normalize;
use super::playback::{AudioRenderer, PlaybackSettings, RenderStats};
use super::request::{Backend, SynthesisRequest};
use super::tts::{
    CloudBackend, LocalBackend, OnDeviceBackend, PiperEngine, RemoteGenerateBackend,
    RemoteStreamingBackend, SpeechBackend,
};
use crate::config::Config;
use crate::{Error, Result, SynthesisError};

/// Connect timeout for TTS HTTP requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the HTTP client shared by the network backends
///
/// # Errors
///
/// Returns error if the TLS backend cannot be initialized
pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("tars-speech/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// How a successful synthesis reached the speaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// Rendered by this process
    Rendered(RenderStats),
    /// The backend played the audio itself
    PlayedByBackend,
}

/// Routes requests to backends and plays the result
pub struct Dispatcher {
    backends: HashMap<Backend, Arc<dyn SpeechBackend>>,
    renderer: AudioRenderer,
    settings: PlaybackSettings,
}

impl Dispatcher {
    /// Create a dispatcher with no backends registered
    #[must_use]
    pub fn new(renderer: AudioRenderer, settings: PlaybackSettings) -> Self {
        Self {
            backends: HashMap::new(),
            renderer,
            settings,
        }
    }

    /// Create a dispatcher with every backend registered and the system
    /// output device
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http_client()?;

        let device = config
            .output_device
            .clone()
            .map_or_else(CpalOutputDevice::new, CpalOutputDevice::named);
        let renderer = AudioRenderer::new(Arc::new(device));

        let cloud = match &config.azure.endpoint {
            Some(endpoint) => CloudBackend::with_endpoint(client.clone(), endpoint.clone()),
            None => CloudBackend::new(client.clone()),
        };
        let engine = PiperEngine::new(config.piper.binary.clone(), config.piper.model.clone());

        let dispatcher = Self::new(renderer, config.playback)
            .with_backend(Arc::new(cloud))
            .with_backend(Arc::new(LocalBackend::new(config.local.clone())))
            .with_backend(Arc::new(RemoteStreamingBackend::new(
                client.clone(),
                config.stream_format,
            )))
            .with_backend(Arc::new(RemoteGenerateBackend::new(client)))
            .with_backend(Arc::new(OnDeviceBackend::new(Arc::new(engine))));

        tracing::debug!(backends = ?dispatcher.backends(), "speech dispatcher ready");
        Ok(dispatcher)
    }

    /// Register an adapter, replacing any previous one for its backend
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn SpeechBackend>) -> Self {
        self.register(backend);
        self
    }

    /// Register an adapter, replacing any previous one for its backend
    pub fn register(&mut self, backend: Arc<dyn SpeechBackend>) {
        self.backends.insert(backend.backend(), backend);
    }

    /// Backends that have an adapter
    #[must_use]
    pub fn backends(&self) -> Vec<Backend> {
        Backend::ALL
            .into_iter()
            .filter(|b| self.backends.contains_key(b))
            .collect()
    }

    /// Playback options applied to every request
    #[must_use]
    pub const fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    /// Synthesize the request and play it, returning once playback ends
    ///
    /// # Errors
    ///
    /// Returns a `SynthesisError` tagged with the request's backend; its kind
    /// tells validation failures (nothing was attempted) apart from provider,
    /// network and playback failures
    pub async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> std::result::Result<SynthesisOutcome, SynthesisError> {
        let backend = request.backend;

        match self.run(request).await {
            Ok(outcome) => {
                tracing::debug!(%backend, ?outcome, "speech synthesis complete");
                Ok(outcome)
            }
            Err(source) => {
                tracing::error!(%backend, kind = %source.kind(), error = %source, "speech synthesis failed");
                Err(SynthesisError::new(backend, source))
            }
        }
    }

    async fn run(&self, request: &SynthesisRequest) -> Result<SynthesisOutcome> {
        request.validate()?;

        let adapter = self
            .backends
            .get(&request.backend)
            .ok_or(Error::UnsupportedBackend(request.backend))?;

        tracing::debug!(
            backend = %request.backend,
            chars = request.text.chars().count(),
            "dispatching speech request"
        );

        let source = match adapter.synthesize(request).await? {
            BackendResult::AlreadyPlayed => return Ok(SynthesisOutcome::PlayedByBackend),
            BackendResult::Audio(source) => source,
        };

        let audio = normalize(source);
        let stats = self
            .renderer
            .render(audio.chunks, audio.format, &self.settings)
            .await?;

        Ok(SynthesisOutcome::Rendered(stats))
    }
}
