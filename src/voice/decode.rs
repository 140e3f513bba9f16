//! Decoding of complete audio payloads (WAV, MP3) into PCM buffers

use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use super::audio::{AudioBuffer, AudioFormat};
use crate::{Error, Result};

/// Decode a complete WAV or MP3 payload into 16-bit PCM
///
/// # Errors
///
/// Returns `Error::Decode` if the payload is empty, malformed, or has a
/// channel layout other than mono or stereo
pub fn decode_audio(data: &[u8]) -> Result<AudioBuffer> {
    if data.is_empty() {
        return Err(Error::Decode("empty audio payload".to_string()));
    }

    if data.starts_with(b"RIFF") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

/// Decode WAV bytes to i16 samples
fn decode_wav(data: &[u8]) -> Result<AudioBuffer> {
    let mut reader =
        WavReader::new(Cursor::new(data)).map_err(|e| Error::Decode(format!("WAV header: {e}")))?;
    let spec = reader.spec();
    let format = AudioFormat::new(spec.sample_rate, spec.channels)
        .map_err(|e| Error::Decode(e.to_string()))?;

    let samples = match spec.sample_format {
        SampleFormat::Int => {
            let bits = u32::from(spec.bits_per_sample);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| int_to_i16(v, bits)))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(float_to_i16))
            .collect::<std::result::Result<Vec<_>, _>>(),
    }
    .map_err(|e| Error::Decode(format!("WAV samples: {e}")))?;

    tracing::debug!(
        sample_rate = format.sample_rate,
        channels = format.channels,
        samples = samples.len(),
        "decoded WAV payload"
    );

    Ok(AudioBuffer { format, samples })
}

/// Decode MP3 bytes, keeping the stream's own rate and channel layout
fn decode_mp3(data: &[u8]) -> Result<AudioBuffer> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut format = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if format.is_none() {
                    let rate = u32::try_from(frame.sample_rate)
                        .map_err(|_| Error::Decode("negative MP3 sample rate".to_string()))?;
                    let channels = u16::try_from(frame.channels)
                        .map_err(|_| Error::Decode("bad MP3 channel count".to_string()))?;
                    format = Some(
                        AudioFormat::new(rate, channels)
                            .map_err(|e| Error::Decode(e.to_string()))?,
                    );
                }
                samples.extend_from_slice(&frame.data);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    let format = format.ok_or_else(|| Error::Decode("no audio frames in payload".to_string()))?;
    Ok(AudioBuffer { format, samples })
}

/// Scale an integer sample of `bits` width to 16 bits
#[allow(clippy::cast_possible_truncation)]
fn int_to_i16(value: i32, bits: u32) -> i16 {
    let scaled = match bits {
        0..=15 => value << (16 - bits),
        16 => value,
        _ => value >> (bits - 16),
    };
    scaled.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_i16(value: f32) -> i16 {
    (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<&mut Cursor<Vec<u8>>>)) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_16bit_mono_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let data = wav_bytes(spec, |w| {
            for s in [0i16, 1000, -1000, i16::MAX] {
                w.write_sample(s).unwrap();
            }
        });

        let buffer = decode_audio(&data).unwrap();
        assert_eq!(buffer.format, AudioFormat::mono(24000));
        assert_eq!(buffer.samples, vec![0, 1000, -1000, i16::MAX]);
    }

    #[test]
    fn test_decode_float_stereo_wav() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let data = wav_bytes(spec, |w| {
            for s in [0.5f32, -0.5, 1.0, -1.0] {
                w.write_sample(s).unwrap();
            }
        });

        let buffer = decode_audio(&data).unwrap();
        assert_eq!(buffer.format.channels, 2);
        assert_eq!(buffer.samples, vec![16384, -16384, 32767, -32768]);
    }

    #[test]
    fn test_int_width_scaling() {
        assert_eq!(int_to_i16(127, 8), 127 << 8);
        assert_eq!(int_to_i16(0x7F_FFFF, 24), i16::MAX);
        assert_eq!(int_to_i16(-0x80_0000, 24), i16::MIN);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(decode_audio(&[]), Err(Error::Decode(_))));
        assert!(matches!(decode_audio(b"RIFFnope"), Err(Error::Decode(_))));
        assert!(matches!(decode_audio(b"definitely not audio"), Err(Error::Decode(_))));
    }
}
