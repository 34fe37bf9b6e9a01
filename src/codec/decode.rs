//! Encoded bytes to mono f32 PCM via Symphonia.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::AudioFormat;
use crate::audio::AudioBuffer;
use crate::error::{Result, VoiceError};

/// Decode a complete encoded body to a mono [`AudioBuffer`].
///
/// Raw pcm is interpreted as 16-bit LE mono at `pcm_sample_rate`; wav and
/// the compressed containers go through Symphonia, downmixed to mono.
pub fn decode(bytes: &[u8], format: AudioFormat, pcm_sample_rate: u32) -> Result<AudioBuffer> {
    match format {
        AudioFormat::Pcm => Ok(AudioBuffer::from_i16_le(bytes, pcm_sample_rate)),
        AudioFormat::Opus => Err(VoiceError::Codec(
            "no local opus decoder; negotiate a different playback format".into(),
        )),
        _ => decode_container(bytes, format),
    }
}

fn decode_container(bytes: &[u8], format: AudioFormat) -> Result<AudioBuffer> {
    // .to_vec() is required: MediaSourceStream::new takes Box<dyn MediaSource>
    // which implies 'static, so a borrowed Cursor cannot be used here.
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| VoiceError::Codec(format!("{format} probe failed: {e}")))?;

    let mut reader = probed.format;
    let track = reader
        .default_track()
        .ok_or_else(|| VoiceError::Codec(format!("no audio track in {format} body")))?;
    let track_id = track.id;
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let sample_rate = track.codec_params.sample_rate.unwrap_or(24_000);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| VoiceError::Codec(format!("{format} decoder init failed: {e}")))?;

    let mut samples = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(VoiceError::Codec(format!("{format} decode error: {e}")));
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("{} packet decode error (skipping): {}", format, e);
                continue;
            }
        };
        let spec = *decoded.spec();
        let capacity = decoded.capacity();
        let mut sample_buf = SampleBuffer::<f32>::new(capacity as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let interleaved = sample_buf.samples();

        if channels == 1 {
            samples.extend_from_slice(interleaved);
        } else {
            for frame in interleaved.chunks(channels) {
                let sum: f32 = frame.iter().sum();
                samples.push(sum / channels as f32);
            }
        }
    }

    Ok(AudioBuffer::new(samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::wav;

    #[test]
    fn pcm_decode_is_a_passthrough() {
        let bytes: Vec<u8> = [0i16, 16384, -16384]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let buf = decode(&bytes, AudioFormat::Pcm, 24_000).unwrap();
        assert_eq!(buf.samples.len(), 3);
        assert!((buf.samples[1] - 0.5).abs() < 0.001);
        assert_eq!(buf.sample_rate, 24_000);
    }

    #[test]
    fn wav_survives_encode_then_decode() {
        let original = AudioBuffer::new(
            (0..2400).map(|i| (i as f32 / 2400.0).sin() * 0.8).collect(),
            24_000,
        );
        let encoded = wav::encode_wav(&original).unwrap();
        let decoded = decode(&encoded, AudioFormat::Wav, 24_000).unwrap();
        assert_eq!(decoded.sample_rate, 24_000);
        assert_eq!(decoded.samples.len(), original.samples.len());
        for (a, b) in original.samples.iter().zip(decoded.samples.iter()) {
            // 16-bit quantization tolerance.
            assert!((a - b).abs() < 2.0 / 32768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn opus_is_rejected_with_a_codec_error() {
        let e = decode(&[0u8; 16], AudioFormat::Opus, 24_000).unwrap_err();
        assert_eq!(e.kind(), "codec_error");
    }
}
