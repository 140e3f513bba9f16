//! AllTalk server synthesis: generate a file, then download it

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{SpeechBackend, endpoint_url, ensure_success};
use crate::voice::audio::{AudioSource, BackendResult};
use crate::voice::decode::decode_audio;
use crate::voice::request::{Backend, SynthesisRequest};
use crate::{Error, Result};

/// Two-step remote synthesis
///
/// Either step failing fails the whole request; there is no retry and no
/// partial playback.
pub struct RemoteGenerateBackend {
    client: Client,
    language: String,
}

impl RemoteGenerateBackend {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            language: "en".to_string(),
        }
    }

    /// Ask the server to render `text` and return where the file lives
    async fn generate(&self, endpoint: &Url, text: &str, voice: &str) -> Result<Url> {
        let url = endpoint_url(endpoint, "api/tts-generate");
        let voice_file = format!("{voice}.wav");

        let form = [
            ("text_input", text),
            ("text_filtering", "standard"),
            ("character_voice_gen", voice_file.as_str()),
            ("narrator_enabled", "false"),
            ("narrator_voice_gen", "default.wav"),
            ("text_not_inside", "character"),
            ("language", self.language.as_str()),
            ("output_file_name", "tars_output"),
            ("output_file_timestamp", "true"),
            ("autoplay", "false"),
            ("autoplay_volume", "0.8"),
        ];

        let response = self.client.post(&url).form(&form).send().await?;
        let response = ensure_success(response, "TTS generate").await?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("invalid TTS generate response: {e}")))?;

        let file_url = body
            .output_file_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::provider("response missing output_file_url"))?;

        Url::parse(&file_url)
            .or_else(|_| endpoint.join(&file_url))
            .map_err(|e| Error::provider(format!("bad output_file_url {file_url}: {e}")))
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    output_file_url: Option<String>,
}

#[async_trait]
impl SpeechBackend for RemoteGenerateBackend {
    fn backend(&self) -> Backend {
        Backend::RemoteGenerate
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<BackendResult> {
        let endpoint = request.endpoint()?;
        let voice = request.voice.as_deref().unwrap_or("default");

        let file_url = self.generate(endpoint, &request.text, voice).await?;
        tracing::debug!(url = %file_url, "downloading generated audio");

        let response = self.client.get(file_url).send().await?;
        let response = ensure_success(response, "TTS download").await?;
        let audio = response.bytes().await?;

        let buffer = decode_audio(&audio)?;
        Ok(BackendResult::Audio(AudioSource::Buffer(buffer)))
    }
}
