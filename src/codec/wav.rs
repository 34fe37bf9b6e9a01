//! PCM and WAV encoding for the upload path.

use std::io::Cursor;

use super::AudioFormat;
use crate::audio::AudioBuffer;
use crate::error::{Result, VoiceError};

/// Encode a buffer into the requested upload format.
///
/// Only raw pcm and wav are locally encodable; callers negotiate with
/// [`AudioFormat::encodable`] before asking for anything else.
pub fn encode(buffer: &AudioBuffer, format: AudioFormat) -> Result<Vec<u8>> {
    match format {
        AudioFormat::Pcm => Ok(buffer.to_i16_le()),
        AudioFormat::Wav => encode_wav(buffer),
        other => Err(VoiceError::Codec(format!(
            "no local {other} encoder; negotiate an encodable upload format"
        ))),
    }
}

/// 16-bit mono WAV bytes.
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Codec(format!("wav writer init failed: {e}")))?;
        for &sample in &buffer.samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer
                .write_sample((clamped * 32767.0) as i16)
                .map_err(|e| VoiceError::Codec(format!("wav write failed: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Codec(format!("wav finalize failed: {e}")))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_carries_the_sample_rate() {
        let buf = AudioBuffer::new(vec![0.0; 480], 24_000);
        let bytes = encode_wav(&buf).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        let rate = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
        assert_eq!(rate, 24_000);
    }

    #[test]
    fn pcm_round_trips_through_i16() {
        let buf = AudioBuffer::new(vec![0.0, 0.5, -0.5, 1.0, -1.0], 24_000);
        let bytes = encode(&buf, AudioFormat::Pcm).unwrap();
        assert_eq!(bytes.len(), 10);
        let back = AudioBuffer::from_i16_le(&bytes, 24_000);
        for (a, b) in buf.samples.iter().zip(back.samples.iter()) {
            assert!((a - b).abs() < 2.0 / 32768.0);
        }
    }

    #[test]
    fn lossy_encode_requests_are_refused() {
        let buf = AudioBuffer::new(vec![0.0; 10], 24_000);
        assert!(encode(&buf, AudioFormat::Mp3).is_err());
        assert!(encode(&buf, AudioFormat::Opus).is_err());
    }
}
