//! Voice output module
//!
//! Routes text to one of several TTS backends and plays the result through
//! a single renderer. Backends either hand back audio (a whole buffer or a
//! chunk stream) or play it themselves.

mod audio;
mod decode;
mod device;
mod dispatcher;
mod normalizer;
mod playback;
mod queue;
mod request;
pub mod tts;

pub use audio::{
    AudioBuffer, AudioChunk, AudioFormat, AudioSource, BackendResult, ChunkStream,
    DEFAULT_SAMPLE_RATE,
};
pub use decode::decode_audio;
pub use device::CpalOutputDevice;
pub use dispatcher::{Dispatcher, SynthesisOutcome, http_client};
pub use normalizer::{NormalizedAudio, normalize};
pub use playback::{
    AudioRenderer, DEFAULT_BLOCK_SIZE, OutputDevice, OutputStream, PlaybackSettings, RenderStats,
    process_chunk,
};
pub use queue::SpeechQueue;
pub use request::{Backend, CloudCredentials, SynthesisRequest};
pub use tts::{
    CloudBackend, CommandSpec, LocalBackend, LocalPipeline, OnDeviceBackend, PiperEngine,
    RemoteGenerateBackend, RemoteStreamingBackend, SpeechBackend, SpeechEngine, StreamingSettings,
};
