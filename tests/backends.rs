//! HTTP backend integration tests against mock servers

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mockito::Matcher;
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

use tars_speech::ErrorKind;
use tars_speech::voice::tts::AZURE_OUTPUT_FORMAT;
use tars_speech::voice::{
    AudioFormat, AudioSource, Backend, BackendResult, CloudBackend, CloudCredentials,
    RemoteGenerateBackend, RemoteStreamingBackend, SpeechBackend, StreamingSettings,
    SynthesisOutcome, SynthesisRequest,
};

mod common;

use common::{RecordingDevice, dispatcher_with, pcm_bytes, wav_bytes};

fn ramp(len: usize) -> Vec<i16> {
    (0..len).map(|i| i16::try_from(i % 2000).unwrap() - 1000).collect()
}

#[tokio::test]
async fn test_streaming_plays_all_pcm() {
    let mut server = mockito::Server::new_async().await;
    let samples = ramp(3000);

    let mock = server
        .mock("GET", "/tts_stream")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("text".into(), "Hello there".into()),
            Matcher::UrlEncoded("speaker_wav".into(), "TARS".into()),
            Matcher::UrlEncoded("language".into(), "en".into()),
        ]))
        .match_header("accept", "audio/x-wav")
        .with_status(200)
        .with_header("content-type", "audio/x-wav")
        .with_body(wav_bytes(&samples, 24000, 1))
        .create_async()
        .await;

    let device = RecordingDevice::new();
    let dispatcher = dispatcher_with(&device).with_backend(Arc::new(RemoteStreamingBackend::new(
        Client::new(),
        AudioFormat::mono(24000),
    )));

    let request = SynthesisRequest::new("Hello there", Backend::RemoteStreaming)
        .with_voice("TARS")
        .with_endpoint(Url::parse(&server.url()).unwrap());
    let outcome = dispatcher.synthesize(&request).await.unwrap();

    mock.assert_async().await;
    let SynthesisOutcome::Rendered(stats) = outcome else {
        panic!("expected rendered outcome");
    };
    // 1024-byte chunks hold 512 samples
    assert_eq!(stats.chunks, 6);
    assert_eq!(device.samples(), samples);
    assert_eq!(device.formats(), vec![AudioFormat::mono(24000)]);
}

#[tokio::test]
async fn test_streaming_headerless_pcm() {
    let mut server = mockito::Server::new_async().await;
    let samples = ramp(700);

    let _mock = server
        .mock("GET", "/tts_stream")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(pcm_bytes(&samples))
        .create_async()
        .await;

    let device = RecordingDevice::new();
    let dispatcher = dispatcher_with(&device).with_backend(Arc::new(RemoteStreamingBackend::new(
        Client::new(),
        AudioFormat::mono(22050),
    )));

    let request = SynthesisRequest::new("Hello", Backend::RemoteStreaming)
        .with_endpoint(Url::parse(&server.url()).unwrap());
    dispatcher.synthesize(&request).await.unwrap();

    assert_eq!(device.samples(), samples);
}

#[tokio::test]
async fn test_streaming_server_error_plays_nothing() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/tts_stream")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("model not loaded")
        .create_async()
        .await;

    let device = RecordingDevice::new();
    let dispatcher = dispatcher_with(&device).with_backend(Arc::new(RemoteStreamingBackend::new(
        Client::new(),
        AudioFormat::default(),
    )));

    let request = SynthesisRequest::new("Hello", Backend::RemoteStreaming)
        .with_endpoint(Url::parse(&server.url()).unwrap());
    let err = dispatcher.synthesize(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().contains("model not loaded"));
    assert_eq!(device.opens(), 0);
}

#[tokio::test]
async fn test_streaming_first_chunk_before_body_completes() {
    let mut server = mockito::Server::new_async().await;
    let head = pcm_bytes(&ramp(1024));
    let tail = pcm_bytes(&ramp(512));

    let _mock = server
        .mock("GET", "/tts_stream")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_chunked_body(move |w| {
            w.write_all(&head)?;
            w.flush()?;
            std::thread::sleep(Duration::from_millis(1500));
            w.write_all(&tail)
        })
        .create_async()
        .await;

    let backend = RemoteStreamingBackend::new(Client::new(), AudioFormat::mono(24000));
    let request = SynthesisRequest::new("Hello", Backend::RemoteStreaming)
        .with_endpoint(Url::parse(&server.url()).unwrap());
    let result = backend.synthesize(&request).await.unwrap();
    let BackendResult::Audio(AudioSource::Stream { mut chunks, .. }) = result else {
        panic!("expected a chunk stream");
    };

    let first = tokio::time::timeout(Duration::from_millis(1000), chunks.next())
        .await
        .expect("first chunk should arrive while the server is still sending")
        .unwrap()
        .unwrap();
    assert_eq!(first.samples.len(), 512);

    let mut total = first.samples.len();
    while let Some(chunk) = chunks.next().await {
        total += chunk.unwrap().samples.len();
    }
    assert_eq!(total, 1536);
}

#[tokio::test]
async fn test_streaming_connection_drop_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let head = ramp(1024);
    let body = pcm_bytes(&head);

    // Promises four times the body it sends, then hangs up
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let header = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: audio/x-wav\r\ncontent-length: {}\r\n\r\n",
            body.len() * 4
        );
        socket.write_all(header.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.flush().await.unwrap();
    });

    let device = RecordingDevice::new();
    let dispatcher = dispatcher_with(&device).with_backend(Arc::new(RemoteStreamingBackend::new(
        Client::new(),
        AudioFormat::mono(24000),
    )));

    let request = SynthesisRequest::new("Hello", Backend::RemoteStreaming)
        .with_endpoint(Url::parse(&format!("http://{addr}")).unwrap());
    let err = dispatcher.synthesize(&request).await.unwrap_err();
    server.await.unwrap();

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(device.opens(), 1);
    assert_eq!(device.samples(), head);
}

#[tokio::test]
async fn test_push_streaming_settings() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/set_tts_settings")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "stream_chunk_size": 100,
            "top_k": 50,
            "enable_text_splitting": true,
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let backend = RemoteStreamingBackend::new(Client::new(), AudioFormat::default());
    backend
        .update_settings(&Url::parse(&server.url()).unwrap(), &StreamingSettings::default())
        .await;

    mock.assert_async().await;
}

#[tokio::test]
async fn test_two_step_generate_then_download() {
    let mut server = mockito::Server::new_async().await;
    let samples = ramp(400);

    let generate = server
        .mock("POST", "/api/tts-generate")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("text_input".into(), "Hello".into()),
            Matcher::UrlEncoded("character_voice_gen".into(), "TARS.wav".into()),
            Matcher::UrlEncoded("output_file_name".into(), "tars_output".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"generate-success","output_file_url":"/audio/tars_output_1.wav"}"#)
        .create_async()
        .await;
    let download = server
        .mock("GET", "/audio/tars_output_1.wav")
        .with_status(200)
        .with_body(wav_bytes(&samples, 24000, 1))
        .create_async()
        .await;

    let device = RecordingDevice::new();
    let dispatcher =
        dispatcher_with(&device).with_backend(Arc::new(RemoteGenerateBackend::new(Client::new())));

    let request = SynthesisRequest::new("Hello", Backend::RemoteGenerate)
        .with_voice("TARS")
        .with_endpoint(Url::parse(&server.url()).unwrap());
    dispatcher.synthesize(&request).await.unwrap();

    generate.assert_async().await;
    download.assert_async().await;
    assert_eq!(device.samples(), samples);
    assert_eq!(device.formats(), vec![AudioFormat::mono(24000)]);
}

#[tokio::test]
async fn test_two_step_generate_failure_skips_download() {
    let mut server = mockito::Server::new_async().await;
    let _generate = server
        .mock("POST", "/api/tts-generate")
        .with_status(500)
        .with_body("voice file not found")
        .create_async()
        .await;
    let download = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let device = RecordingDevice::new();
    let dispatcher =
        dispatcher_with(&device).with_backend(Arc::new(RemoteGenerateBackend::new(Client::new())));

    let request = SynthesisRequest::new("Hello", Backend::RemoteGenerate)
        .with_endpoint(Url::parse(&server.url()).unwrap());
    let err = dispatcher.synthesize(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().contains("voice file not found"));
    download.assert_async().await;
    assert_eq!(device.opens(), 0);
}

#[tokio::test]
async fn test_two_step_missing_file_url_skips_download() {
    let mut server = mockito::Server::new_async().await;
    let _generate = server
        .mock("POST", "/api/tts-generate")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"generate-success"}"#)
        .create_async()
        .await;
    let download = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let device = RecordingDevice::new();
    let dispatcher =
        dispatcher_with(&device).with_backend(Arc::new(RemoteGenerateBackend::new(Client::new())));

    let request = SynthesisRequest::new("Hello", Backend::RemoteGenerate)
        .with_endpoint(Url::parse(&server.url()).unwrap());
    let err = dispatcher.synthesize(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().contains("output_file_url"));
    download.assert_async().await;
    assert_eq!(device.opens(), 0);
}

#[tokio::test]
async fn test_two_step_download_failure() {
    let mut server = mockito::Server::new_async().await;
    let url = format!("{}/audio/gone.wav", server.url());
    let _generate = server
        .mock("POST", "/api/tts-generate")
        .with_status(200)
        .with_body(format!(r#"{{"output_file_url":"{url}"}}"#))
        .create_async()
        .await;
    let _download = server
        .mock("GET", "/audio/gone.wav")
        .with_status(404)
        .create_async()
        .await;

    let device = RecordingDevice::new();
    let dispatcher =
        dispatcher_with(&device).with_backend(Arc::new(RemoteGenerateBackend::new(Client::new())));

    let request = SynthesisRequest::new("Hello", Backend::RemoteGenerate)
        .with_endpoint(Url::parse(&server.url()).unwrap());
    let err = dispatcher.synthesize(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(device.opens(), 0);
}

#[tokio::test]
async fn test_missing_endpoint_makes_no_http_call() {
    let mut server = mockito::Server::new_async().await;
    let any = server.mock("POST", Matcher::Any).expect(0).create_async().await;

    let device = RecordingDevice::new();
    let dispatcher =
        dispatcher_with(&device).with_backend(Arc::new(RemoteGenerateBackend::new(Client::new())));

    let err = dispatcher
        .synthesize(&SynthesisRequest::new("Hello", Backend::RemoteGenerate))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingEndpoint);
    any.assert_async().await;
}

#[tokio::test]
async fn test_cloud_posts_ssml_and_plays_wav() {
    let mut server = mockito::Server::new_async().await;
    let samples = ramp(240);

    let mock = server
        .mock("POST", "/cognitiveservices/v1")
        .match_header("Ocp-Apim-Subscription-Key", "k-123")
        .match_header("Content-Type", "application/ssml+xml")
        .match_header("X-Microsoft-OutputFormat", AZURE_OUTPUT_FORMAT)
        .match_body(Matcher::Regex(
            "<voice name='en-US-SteffanNeural'>.*Fish &amp; chips".to_string(),
        ))
        .with_status(200)
        .with_body(wav_bytes(&samples, 24000, 1))
        .create_async()
        .await;

    let device = RecordingDevice::new();
    let cloud = CloudBackend::with_endpoint(
        Client::new(),
        format!("{}/cognitiveservices/v1", server.url()),
    );
    let dispatcher = dispatcher_with(&device).with_backend(Arc::new(cloud));

    let request = SynthesisRequest::new("Fish & chips", Backend::Cloud)
        .with_credentials(CloudCredentials::new("k-123", "eastus"));
    dispatcher.synthesize(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(device.samples(), samples);
}

#[tokio::test]
async fn test_cloud_auth_failure_is_provider_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/cognitiveservices/v1")
        .with_status(401)
        .create_async()
        .await;

    let device = RecordingDevice::new();
    let cloud = CloudBackend::with_endpoint(
        Client::new(),
        format!("{}/cognitiveservices/v1", server.url()),
    );
    let dispatcher = dispatcher_with(&device).with_backend(Arc::new(cloud));

    let request = SynthesisRequest::new("Hello", Backend::Cloud)
        .with_credentials(CloudCredentials::new("bad", "eastus"));
    let err = dispatcher.synthesize(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(err.backend, Backend::Cloud);
    assert_eq!(device.opens(), 0);
}
