//! Synthesis requests and backend selection

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// Speech synthesis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Backend {
    /// Azure Speech REST API
    Cloud,
    /// `espeak-ng | sox | aplay` pipeline on this machine
    Local,
    /// XTTS server streaming raw PCM over HTTP
    RemoteStreaming,
    /// AllTalk server: generate a file, then download it
    RemoteGenerate,
    /// Piper neural voice running on-device
    OnDeviceModel,
}

impl Backend {
    /// Every backend, in dispatch table order
    pub const ALL: [Self; 5] = [
        Self::Cloud,
        Self::Local,
        Self::RemoteStreaming,
        Self::RemoteGenerate,
        Self::OnDeviceModel,
    ];

    /// Canonical name used in config files and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Local => "local",
            Self::RemoteStreaming => "remote-streaming",
            Self::RemoteGenerate => "remote-generate",
            Self::OnDeviceModel => "on-device-model",
        }
    }

    /// Whether the backend talks to a self-hosted TTS server
    #[must_use]
    pub const fn requires_endpoint(self) -> bool {
        matches!(self, Self::RemoteStreaming | Self::RemoteGenerate)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cloud" | "azure" => Ok(Self::Cloud),
            "local" | "espeak" => Ok(Self::Local),
            "remote-streaming" | "xttsv2" | "xtts" => Ok(Self::RemoteStreaming),
            "remote-generate" | "alltalk" => Ok(Self::RemoteGenerate),
            "on-device-model" | "piper" => Ok(Self::OnDeviceModel),
            other => Err(Error::Config(format!("unknown TTS backend: {other}"))),
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Azure Speech subscription key and region
#[derive(Debug, Clone)]
pub struct CloudCredentials {
    api_key: SecretString,
    region: String,
}

impl CloudCredentials {
    /// Create credentials from a subscription key and region identifier
    #[must_use]
    pub fn new(api_key: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            region: region.into(),
        }
    }

    /// Subscription key
    #[must_use]
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Region identifier (e.g. "eastus")
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn is_complete(&self) -> bool {
        !self.api_key.expose_secret().trim().is_empty() && !self.region.trim().is_empty()
    }
}

/// A single text-to-speech request
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Text to speak
    pub text: String,
    /// Backend to route through
    pub backend: Backend,
    /// Voice or speaker identifier, meaning depends on the backend
    pub voice: Option<String>,
    /// Cloud credentials
    pub credentials: Option<CloudCredentials>,
    /// Base URL of a self-hosted TTS server
    pub server_endpoint: Option<Url>,
}

impl SynthesisRequest {
    /// Create a request with no optional fields set
    pub fn new(text: impl Into<String>, backend: Backend) -> Self {
        Self {
            text: text.into(),
            backend,
            voice: None,
            credentials: None,
            server_endpoint: None,
        }
    }

    /// Set the voice identifier
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set cloud credentials
    #[must_use]
    pub fn with_credentials(mut self, credentials: CloudCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the TTS server endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.server_endpoint = Some(endpoint);
        self
    }

    /// Check that the request carries what its backend needs
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for empty text, `MissingCredentials` for a
    /// cloud request without key and region, `MissingEndpoint` for a server
    /// backend without an endpoint
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidRequest("text must not be empty".to_string()));
        }

        match self.backend {
            Backend::Cloud => {
                if !self.credentials.as_ref().is_some_and(CloudCredentials::is_complete) {
                    return Err(Error::MissingCredentials(self.backend));
                }
            }
            backend if backend.requires_endpoint() => {
                if self.server_endpoint.is_none() {
                    return Err(Error::MissingEndpoint(backend));
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Endpoint for server backends
    ///
    /// # Errors
    ///
    /// Returns `MissingEndpoint` if none is set
    pub fn endpoint(&self) -> Result<&Url> {
        self.server_endpoint
            .as_ref()
            .ok_or(Error::MissingEndpoint(self.backend))
    }
}
