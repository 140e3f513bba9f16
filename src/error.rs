//! Error types for TARS speech synthesis

use std::fmt;

use thiserror::Error;

use crate::voice::Backend;

/// Result type alias for speech operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synthesizing or playing speech
#[derive(Debug, Error)]
pub enum Error {
    /// Request rejected before any backend was contacted
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cloud backend selected without an API key and region
    #[error("{0} backend requires an API key and region")]
    MissingCredentials(Backend),

    /// Server backend selected without an endpoint URL
    #[error("{0} backend requires a server endpoint")]
    MissingEndpoint(Backend),

    /// Backend reported a failure
    #[error("provider error: {reason}")]
    Provider {
        /// Provider-supplied or locally derived failure reason
        reason: String,
    },

    /// Transport failure during an HTTP step
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Output device failure
    #[error("playback error: {0}")]
    Playback(String),

    /// No adapter registered for the selected backend
    #[error("no adapter registered for {0} backend")]
    UnsupportedBackend(Backend),

    /// Audio payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a provider error from any displayable reason
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider {
            reason: reason.into(),
        }
    }

    /// Coarse classification used by callers to branch on failures
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::MissingCredentials(_) => ErrorKind::MissingCredentials,
            Self::MissingEndpoint(_) => ErrorKind::MissingEndpoint,
            Self::Provider { .. } | Self::Decode(_) | Self::Io(_) => ErrorKind::Provider,
            Self::Network(_) => ErrorKind::Network,
            Self::Playback(_) => ErrorKind::Playback,
            Self::UnsupportedBackend(_) => ErrorKind::UnsupportedBackend,
            Self::Config(_) | Self::Serialization(_) | Self::Toml(_) => {
                ErrorKind::Config
            }
        }
    }
}

/// Failure categories surfaced at the dispatcher boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    MissingCredentials,
    MissingEndpoint,
    Provider,
    Network,
    Playback,
    UnsupportedBackend,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidRequest => "invalid request",
            Self::MissingCredentials => "missing credentials",
            Self::MissingEndpoint => "missing endpoint",
            Self::Provider => "provider error",
            Self::Network => "network error",
            Self::Playback => "playback error",
            Self::UnsupportedBackend => "unsupported backend",
            Self::Config => "configuration error",
        };
        f.write_str(name)
    }
}

/// A failed synthesis, tagged with the backend it was routed to
#[derive(Debug, Error)]
#[error("{backend} synthesis failed: {source}")]
pub struct SynthesisError {
    /// Backend the request was routed to
    pub backend: Backend,
    /// Underlying error, kind unchanged
    #[source]
    pub source: Error,
}

impl SynthesisError {
    /// Wrap an error with the originating backend
    #[must_use]
    pub const fn new(backend: Backend, source: Error) -> Self {
        Self { backend, source }
    }

    /// Kind of the underlying error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
