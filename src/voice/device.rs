//! Host audio output through `cpal`
//!
//! `cpal` streams are not `Send`, so each session runs its stream on a
//! dedicated thread and receives sample blocks over a bounded channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use super::audio::AudioFormat;
use super::playback::{OutputDevice, OutputStream};
use crate::{Error, Result};

/// Blocks buffered ahead of the device callback
const QUEUE_DEPTH: usize = 4;

/// Poll interval while draining
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Grace period on top of the expected playback time
const DRAIN_SLACK: Duration = Duration::from_millis(500);

/// Default (or named) host output device
#[derive(Debug, Clone, Default)]
pub struct CpalOutputDevice {
    device_name: Option<String>,
}

impl CpalOutputDevice {
    /// Use the host's default output device
    #[must_use]
    pub const fn new() -> Self {
        Self { device_name: None }
    }

    /// Use the output device with this exact name
    #[must_use]
    pub const fn named(device_name: String) -> Self {
        Self {
            device_name: Some(device_name),
        }
    }
}

#[async_trait]
impl OutputDevice for CpalOutputDevice {
    async fn open(&self, format: AudioFormat) -> Result<Box<dyn OutputStream>> {
        let (block_tx, block_rx) = mpsc::channel::<Vec<i16>>(QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let shared = Arc::new(SharedState::default());

        let device_name = self.device_name.clone();
        let thread_shared = Arc::clone(&shared);

        let worker = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), format, block_rx, thread_shared)
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(Error::Playback(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Hold the stream until the session handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(Error::Playback("audio thread exited during setup".to_string()));
            }
        }

        Ok(Box::new(CpalOutputStream {
            blocks: Some(block_tx),
            shared,
            stop: Some(stop_tx),
            worker: Some(worker),
            format,
            written_samples: 0,
        }))
    }

    fn name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }
}

/// State shared between the session handle and the device callback
#[derive(Default)]
struct SharedState {
    finished: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl SharedState {
    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Open session on a `cpal` device
struct CpalOutputStream {
    blocks: Option<mpsc::Sender<Vec<i16>>>,
    shared: Arc<SharedState>,
    stop: Option<std::sync::mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    format: AudioFormat,
    written_samples: usize,
}

impl CpalOutputStream {
    fn check_failure(&self) -> Result<()> {
        match self.shared.failure() {
            Some(reason) => Err(Error::Playback(reason)),
            None => Ok(()),
        }
    }

    fn expected_duration(&self) -> Duration {
        let frames = self.written_samples / usize::from(self.format.channels.max(1));
        let millis = (frames as u64 * 1000) / u64::from(self.format.sample_rate.max(1));
        Duration::from_millis(millis)
    }
}

#[async_trait]
impl OutputStream for CpalOutputStream {
    async fn write(&mut self, block: &[i16]) -> Result<()> {
        self.check_failure()?;

        let sender = self
            .blocks
            .as_ref()
            .ok_or_else(|| Error::Playback("write after drain".to_string()))?;
        sender
            .send(block.to_vec())
            .await
            .map_err(|_| Error::Playback("output stream closed".to_string()))?;

        self.written_samples += block.len();
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        // Closing the channel tells the callback no more blocks are coming
        self.blocks.take();

        let start = Instant::now();
        let timeout = self.expected_duration() + DRAIN_SLACK;

        while !self.shared.finished.load(Ordering::Acquire) {
            self.check_failure()?;
            if start.elapsed() > timeout {
                tracing::warn!(?timeout, "output drain timed out");
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        // Let the device flush its last period
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.check_failure()?;

        let stop = self.stop.take();
        if let Some(worker) = self.worker.take() {
            close_worker(stop, worker).await?;
            tracing::debug!("output device released");
        }
        Ok(())
    }
}

impl Drop for CpalOutputStream {
    fn drop(&mut self) {
        // Undrained sessions detach; the audio thread closes the stream on its own
        self.blocks.take();
        self.stop.take();
        if self.worker.take().is_some() {
            tracing::debug!("output device released without drain");
        }
    }
}

/// Stop the audio thread and wait for it on the blocking pool
///
/// Closing a host stream can take a while on some backends.
async fn close_worker(stop: Option<std::sync::mpsc::Sender<()>>, worker: JoinHandle<()>) -> Result<()> {
    drop(stop);
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .map_err(|e| Error::Playback(format!("audio thread close failed: {e}")))?
        .map_err(|_| Error::Playback("audio thread panicked".to_string()))
}

/// Pulls samples out of the block channel inside the device callback
struct BlockCursor {
    blocks: mpsc::Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    closed: bool,
}

impl BlockCursor {
    /// Fill `frame` with the next `channels` samples; false on underrun or end
    fn next_frame(&mut self, channels: usize, frame: &mut [i16; 2]) -> bool {
        while self.pending.len() < channels && !self.closed {
            match self.blocks.try_recv() {
                Ok(block) => self.pending.extend(block),
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => self.closed = true,
            }
        }

        if self.pending.len() < channels {
            self.pending.clear();
            return false;
        }

        for slot in frame.iter_mut().take(channels) {
            *slot = self.pending.pop_front().unwrap_or(0);
        }
        true
    }

    fn exhausted(&self) -> bool {
        self.closed && self.pending.is_empty()
    }
}

/// Find the device and build a stream that plays `format` through it
fn build_stream(
    device_name: Option<&str>,
    format: AudioFormat,
    blocks: mpsc::Receiver<Vec<i16>>,
    shared: Arc<SharedState>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;
    let config = select_config(&device, format)?;

    let source_channels = usize::from(format.channels);
    let device_channels = usize::from(config.channels);

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = format.sample_rate,
        source_channels,
        device_channels,
        "audio output initialized"
    );

    let mut cursor = BlockCursor {
        blocks,
        pending: VecDeque::new(),
        closed: false,
    };
    let callback_shared = Arc::clone(&shared);
    let mut frame = [0i16; 2];

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for out in data.chunks_mut(device_channels) {
                    if cursor.next_frame(source_channels, &mut frame) {
                        map_frame(&frame[..source_channels], out);
                    } else {
                        out.fill(0.0);
                    }
                }
                if cursor.exhausted() {
                    callback_shared.finished.store(true, Ordering::Release);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                if let Ok(mut slot) = shared.failure.lock() {
                    slot.get_or_insert_with(|| err.to_string());
                }
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))
}

fn find_device(host: &cpal::Host, device_name: Option<&str>) -> Result<Device> {
    match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| Error::Playback(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| Error::Playback(format!("output device not found: {name}"))),
        None => host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string())),
    }
}

/// Prefer the exact channel layout, fall back to any layout at the right rate
fn select_config(device: &Device, format: AudioFormat) -> Result<StreamConfig> {
    let rate = SampleRate(format.sample_rate);
    let supports_rate =
        |c: &cpal::SupportedStreamConfigRange| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate;

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .find(|c| c.channels() == format.channels && supports_rate(c))
        .or_else(|| {
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports_rate(c))
        })
        .ok_or_else(|| {
            Error::Playback(format!(
                "no output config for {} Hz, {} channel(s)",
                format.sample_rate, format.channels
            ))
        })?;

    Ok(supported.with_sample_rate(rate).config())
}

/// Spread one source frame over the device's channels
fn map_frame(source: &[i16], out: &mut [f32]) {
    if out.len() == 1 && source.len() == 2 {
        let mixed = (f32::from(source[0]) + f32::from(source[1])) / 2.0;
        out[0] = mixed / 32768.0;
        return;
    }

    for (i, slot) in out.iter_mut().enumerate() {
        *slot = f32::from(source[i % source.len()]) / 32768.0;
    }
}
