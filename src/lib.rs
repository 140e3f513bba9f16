//! TARS speech - text-to-speech dispatch and streaming playback
//!
//! This library provides the speech output path for the TARS assistant:
//! - Backend selection across cloud, local, self-hosted and on-device TTS
//! - Decoding and chunk normalization of returned audio
//! - Gain, optional peak normalization and blocked playback on the output device
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 SynthesisRequest                     │
//! └────────────────────┬────────────────────────────────┘
//!                      │ validate
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Dispatcher                         │
//! │  Cloud │ Local │ XTTS stream │ AllTalk │ Piper       │
//! └────────────────────┬────────────────────────────────┘
//!                      │ buffer or chunk stream
//! ┌────────────────────▼────────────────────────────────┐
//! │       Normalizer  →  AudioRenderer  →  cpal          │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod voice;

pub use config::Config;
pub use error::{Error, ErrorKind, Result, SynthesisError};
