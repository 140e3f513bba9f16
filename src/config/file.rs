//! TOML configuration file loading
//!
//! Supports `~/.config/tars/speech.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::voice::StreamingSettings;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SpeechConfigFile {
    /// Backend name ("cloud", "local", "xttsv2", ...)
    pub backend: Option<String>,

    /// Voice or speaker identifier
    pub voice: Option<String>,

    /// Base URL of the self-hosted TTS server
    pub server_endpoint: Option<String>,

    /// Azure Speech settings
    #[serde(default)]
    pub azure: AzureFileConfig,

    /// Output settings
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Format of streamed server audio
    #[serde(default)]
    pub stream: StreamFileConfig,

    /// Parameters pushed to the streaming server at startup
    pub streaming_settings: Option<StreamingSettings>,

    /// Local pipeline command overrides
    #[serde(default)]
    pub local: LocalFileConfig,

    /// Piper settings
    #[serde(default)]
    pub piper: PiperFileConfig,
}

/// Azure Speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct AzureFileConfig {
    pub api_key: Option<String>,
    pub region: Option<String>,
    /// Full REST endpoint, overriding the one derived from the region
    pub endpoint: Option<String>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub gain: Option<f32>,
    pub normalize: Option<bool>,
    pub block_size: Option<usize>,
    pub output_device: Option<String>,
}

/// Streamed audio format
#[derive(Debug, Default, Deserialize)]
pub struct StreamFileConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Local pipeline stages as argv arrays
#[derive(Debug, Default, Deserialize)]
pub struct LocalFileConfig {
    pub synth: Option<Vec<String>>,
    pub effects: Option<Vec<String>>,
    pub player: Option<Vec<String>>,
}

/// Piper configuration
#[derive(Debug, Default, Deserialize)]
pub struct PiperFileConfig {
    pub binary: Option<String>,
    pub model: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `SpeechConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SpeechConfigFile {
    config_file_path().map_or_else(SpeechConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_from(path: &Path) -> SpeechConfigFile {
    if !path.exists() {
        return SpeechConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SpeechConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SpeechConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/tars/speech.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("tars").join("speech.toml"))
}
