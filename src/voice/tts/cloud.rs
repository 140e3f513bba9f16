//! Azure Speech cloud synthesis

use async_trait::async_trait;
use reqwest::Client;

use super::{SpeechBackend, ensure_success};
use crate::voice::audio::{AudioSource, BackendResult};
use crate::voice::decode::decode_audio;
use crate::voice::request::{Backend, SynthesisRequest};
use crate::{Error, Result};

/// Voice used when the request does not name one
pub const DEFAULT_AZURE_VOICE: &str = "en-US-SteffanNeural";

/// RIFF output keeps decoding on the WAV path
pub const AZURE_OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";

/// Synthesizes speech with the Azure Speech REST API
///
/// The provider returns the whole utterance in one response.
pub struct CloudBackend {
    client: Client,
    endpoint: Option<String>,
}

impl CloudBackend {
    /// Create a backend that derives the endpoint from the request's region
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: None,
        }
    }

    /// Create a backend that always posts to `endpoint`
    #[must_use]
    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: Some(endpoint.into()),
        }
    }

    fn endpoint_for(&self, region: &str) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!("https://{region}.tts.speech.microsoft.com/cognitiveservices/v1")
        })
    }
}

#[async_trait]
impl SpeechBackend for CloudBackend {
    fn backend(&self) -> Backend {
        Backend::Cloud
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<BackendResult> {
        let credentials = request
            .credentials
            .as_ref()
            .ok_or(Error::MissingCredentials(Backend::Cloud))?;
        let voice = request.voice.as_deref().unwrap_or(DEFAULT_AZURE_VOICE);
        let url = self.endpoint_for(credentials.region());

        tracing::debug!(region = credentials.region(), voice, "requesting Azure synthesis");

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", credentials.api_key())
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", AZURE_OUTPUT_FORMAT)
            .header("User-Agent", "tars-speech")
            .body(build_ssml(&request.text, voice))
            .send()
            .await?;
        let response = ensure_success(response, "Azure TTS").await?;

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::provider("Azure TTS returned no audio"));
        }

        let buffer = decode_audio(&audio)?;
        Ok(BackendResult::Audio(AudioSource::Buffer(buffer)))
    }
}

/// Wrap text in the SSML document Azure expects
fn build_ssml(text: &str, voice: &str) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' \
         xmlns:mstts='http://www.w3.org/2001/mstts' xml:lang='en-US'>\
         <voice name='{}'>\
         <prosody rate=\"10%\" pitch=\"5%\" volume=\"default\">{}</prosody>\
         </voice></speak>",
        escape_xml(voice),
        escape_xml(text)
    )
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
