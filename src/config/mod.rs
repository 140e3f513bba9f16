//! Configuration management for TARS speech
//!
//! Values resolve env > TOML file > defaults. The resolved `Config` is passed
//! explicitly to the dispatcher; nothing here is global.

pub mod file;

use std::path::PathBuf;

use url::Url;

use crate::voice::{
    AudioFormat, Backend, CloudCredentials, CommandSpec, DEFAULT_BLOCK_SIZE, LocalPipeline,
    PlaybackSettings, StreamingSettings, SynthesisRequest,
};
use crate::{Error, Result};

use file::SpeechConfigFile;

/// Resolved speech configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend used when a request does not pick one
    pub backend: Backend,

    /// Voice or speaker identifier
    pub voice: Option<String>,

    /// Self-hosted TTS server base URL
    pub server_endpoint: Option<Url>,

    /// Azure Speech configuration
    pub azure: AzureConfig,

    /// Gain, normalization and block size
    pub playback: PlaybackSettings,

    /// Output device name; default device when unset
    pub output_device: Option<String>,

    /// Format of streamed server audio
    pub stream_format: AudioFormat,

    /// Parameters pushed to the streaming server
    pub streaming_settings: StreamingSettings,

    /// Local pipeline commands
    pub local: LocalPipeline,

    /// Piper engine configuration
    pub piper: PiperConfig,
}

/// Azure Speech configuration
#[derive(Debug, Clone, Default)]
pub struct AzureConfig {
    /// Subscription key and region, when either is configured
    pub credentials: Option<CloudCredentials>,

    /// REST endpoint override
    pub endpoint: Option<String>,
}

/// Piper engine configuration
#[derive(Debug, Clone)]
pub struct PiperConfig {
    /// Binary name or path (default "piper")
    pub binary: String,

    /// ONNX voice model
    pub model: Option<PathBuf>,
}

impl Default for PiperConfig {
    fn default() -> Self {
        Self {
            binary: "piper".to_string(),
            model: None,
        }
    }
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment lookups
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unknown backend, a malformed URL, a
    /// negative or non-finite gain, a zero block size, or an unsupported
    /// stream format
    pub fn resolve(fc: SpeechConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Backend (env > toml > local)
        let backend = env("TARS_TTS_BACKEND")
            .or(fc.backend)
            .map(|s| s.parse::<Backend>())
            .transpose()?
            .unwrap_or(Backend::Local);

        let voice = env("TARS_TTS_VOICE").or(fc.voice);

        let server_endpoint = env("TARS_TTS_URL")
            .or(fc.server_endpoint)
            .map(|raw| {
                Url::parse(&raw).map_err(|e| Error::Config(format!("invalid TTS server URL {raw}: {e}")))
            })
            .transpose()?;

        // Azure credentials (env > toml)
        let api_key = env("AZURE_SPEECH_KEY").or(fc.azure.api_key);
        let region = env("AZURE_SPEECH_REGION").or(fc.azure.region);
        let credentials = match (api_key, region) {
            (None, None) => None,
            (key, region) => Some(CloudCredentials::new(
                key.unwrap_or_default(),
                region.unwrap_or_default(),
            )),
        };
        let azure = AzureConfig {
            credentials,
            endpoint: fc.azure.endpoint,
        };

        // Playback (env > toml > default)
        let gain = match env("TARS_TTS_GAIN") {
            Some(raw) => raw
                .trim()
                .parse::<f32>()
                .map_err(|e| Error::Config(format!("invalid gain {raw}: {e}")))?,
            None => fc.playback.gain.unwrap_or(1.0),
        };
        if !gain.is_finite() || gain < 0.0 {
            return Err(Error::Config(format!("gain must be a non-negative number, got {gain}")));
        }

        let normalize = env("TARS_TTS_NORMALIZE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(fc.playback.normalize)
            .unwrap_or(false);

        let block_size = fc.playback.block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
        if block_size == 0 {
            return Err(Error::Config("block_size must be positive".to_string()));
        }

        let playback = PlaybackSettings {
            gain,
            normalize,
            block_size,
        };
        let output_device = env("TARS_OUTPUT_DEVICE").or(fc.playback.output_device);

        let defaults = AudioFormat::default();
        let stream_format = AudioFormat::new(
            fc.stream.sample_rate.unwrap_or(defaults.sample_rate),
            fc.stream.channels.unwrap_or(defaults.channels),
        )?;

        // Local pipeline overrides
        let mut local = LocalPipeline::default();
        if let Some(argv) = fc.local.synth {
            local.synth = CommandSpec::from_argv(&argv)?;
        }
        if let Some(argv) = fc.local.effects {
            local.effects = CommandSpec::from_argv(&argv)?;
        }
        if let Some(argv) = fc.local.player {
            local.player = CommandSpec::from_argv(&argv)?;
        }

        let piper = PiperConfig {
            binary: fc.piper.binary.unwrap_or_else(|| PiperConfig::default().binary),
            model: env("TARS_PIPER_MODEL").or(fc.piper.model).map(PathBuf::from),
        };

        Ok(Self {
            backend,
            voice,
            server_endpoint,
            azure,
            playback,
            output_device,
            stream_format,
            streaming_settings: fc.streaming_settings.unwrap_or_default(),
            local,
            piper,
        })
    }

    /// Build a request for `text` using the configured backend and credentials
    #[must_use]
    pub fn request(&self, text: impl Into<String>) -> SynthesisRequest {
        self.request_for(text, self.backend)
    }

    /// Build a request for `text` routed to `backend`
    #[must_use]
    pub fn request_for(&self, text: impl Into<String>, backend: Backend) -> SynthesisRequest {
        SynthesisRequest {
            text: text.into(),
            backend,
            voice: self.voice.clone(),
            credentials: self.azure.credentials.clone(),
            server_endpoint: self.server_endpoint.clone(),
        }
    }
}
