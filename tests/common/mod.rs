//! Shared test utilities

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tars_speech::voice::{
    AudioFormat, AudioRenderer, Backend, BackendResult, Dispatcher, OutputDevice, OutputStream,
    PlaybackSettings, SpeechBackend, SynthesisRequest,
};
use tars_speech::{Error, Result};

/// Output device that records every block written to it
#[derive(Default)]
pub struct RecordingDevice {
    state: Arc<DeviceState>,
}

#[derive(Default)]
pub struct DeviceState {
    pub opens: AtomicUsize,
    pub active: AtomicBool,
    pub overlapped: AtomicBool,
    pub formats: Mutex<Vec<AudioFormat>>,
    pub blocks: Mutex<Vec<Vec<i16>>>,
}

impl RecordingDevice {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn overlapped(&self) -> bool {
        self.state.overlapped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn blocks(&self) -> Vec<Vec<i16>> {
        self.state.blocks.lock().unwrap().clone()
    }

    /// Every sample written, in order
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        self.blocks().concat()
    }

    #[must_use]
    pub fn formats(&self) -> Vec<AudioFormat> {
        self.state.formats.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutputDevice for RecordingDevice {
    async fn open(&self, format: AudioFormat) -> Result<Box<dyn OutputStream>> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if self.state.active.swap(true, Ordering::SeqCst) {
            self.state.overlapped.store(true, Ordering::SeqCst);
        }
        self.state.formats.lock().unwrap().push(format);
        Ok(Box::new(RecordingStream {
            state: Arc::clone(&self.state),
        }))
    }

    fn name(&self) -> String {
        "recording".to_string()
    }
}

struct RecordingStream {
    state: Arc<DeviceState>,
}

#[async_trait]
impl OutputStream for RecordingStream {
    async fn write(&mut self, block: &[i16]) -> Result<()> {
        self.state.blocks.lock().unwrap().push(block.to_vec());
        // Give a concurrent session a chance to interleave
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(())
    }
}

impl Drop for RecordingStream {
    fn drop(&mut self) {
        self.state.active.store(false, Ordering::SeqCst);
    }
}

type Respond = Box<dyn Fn() -> Result<BackendResult> + Send + Sync>;

/// Backend that counts calls and answers with a canned result
pub struct FakeBackend {
    backend: Backend,
    calls: AtomicUsize,
    delay: Option<Duration>,
    respond: Respond,
}

impl FakeBackend {
    pub fn new(
        backend: Backend,
        respond: impl Fn() -> Result<BackendResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            calls: AtomicUsize::new(0),
            delay: None,
            respond: Box::new(respond),
        })
    }

    /// A backend that takes `delay` before answering
    pub fn slow(
        backend: Backend,
        delay: Duration,
        respond: impl Fn() -> Result<BackendResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            calls: AtomicUsize::new(0),
            delay: Some(delay),
            respond: Box::new(respond),
        })
    }

    /// A backend that fails with a provider error
    pub fn failing(backend: Backend) -> Arc<Self> {
        Self::new(backend, || Err(Error::provider("backend down")))
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechBackend for FakeBackend {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<BackendResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.respond)()
    }
}

/// Dispatcher over a recording device with default playback settings
#[must_use]
pub fn dispatcher_with(device: &Arc<RecordingDevice>) -> Dispatcher {
    dispatcher_with_settings(device, PlaybackSettings::default())
}

#[must_use]
pub fn dispatcher_with_settings(
    device: &Arc<RecordingDevice>,
    settings: PlaybackSettings,
) -> Dispatcher {
    let device: Arc<dyn OutputDevice> = device.clone();
    Dispatcher::new(AudioRenderer::new(device), settings)
}

/// Encode 16-bit PCM as WAV bytes
#[must_use]
pub fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for &s in samples {
            writer.write_sample(s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

/// Little-endian PCM bytes for a sample slice
#[must_use]
pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
