//! Microphone capture via cpal.
//!
//! Opens the named (or default) input device at its native configuration,
//! downmixes to mono, resamples to the pipeline rate, and pushes 20 ms
//! frames into the SPSC ring buffer.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tracing::{error, info};

use super::ring_buffer::CaptureWriter;
use crate::error::{Result, VoiceError};

/// Resolved info about the audio input we will use.
struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

fn resolve_device(device_name: Option<&str>) -> Result<CaptureConfig> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| VoiceError::Device(format!("failed to enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| VoiceError::Device(format!("input device not found: {name}")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| VoiceError::Device("no default input device available".into()))?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device
        .default_input_config()
        .map_err(|e| VoiceError::Device(format!("failed to get default input config: {e}")))?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    Ok(CaptureConfig {
        device,
        stream_config,
        native_rate,
    })
}

/// Simple linear resampler for mono f32 samples.
pub(crate) fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix interleaved multi-channel audio to mono by averaging.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Start capture into `writer`, resampled to `target_rate` mono.
///
/// Returns the cpal `Stream`, which must be kept alive for the duration of
/// the recording and dropped to release the device.
pub fn start_capture(
    mut writer: CaptureWriter,
    device_name: Option<&str>,
    target_rate: u32,
) -> Result<Stream> {
    let cfg = resolve_device(device_name)?;
    let native_rate = cfg.native_rate;
    let channels = cfg.stream_config.channels;
    let needs_resample = native_rate != target_rate;
    let needs_downmix = channels > 1;

    // One pipeline frame is 20 ms.
    let frame_samples = (target_rate as usize / 50).max(1);
    let mut chunk_buf: Vec<f32> = Vec::with_capacity(frame_samples * 4);

    let stream = cfg
        .device
        .build_input_stream(
            &cfg.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if needs_downmix {
                    to_mono(data, channels)
                } else {
                    data.to_vec()
                };

                let resampled = if needs_resample {
                    resample_linear(&mono, native_rate, target_rate)
                } else {
                    mono
                };

                chunk_buf.extend_from_slice(&resampled);
                while chunk_buf.len() >= frame_samples {
                    let chunk: Vec<f32> = chunk_buf.drain(..frame_samples).collect();
                    // A lagging recorder costs us the tail of this frame;
                    // never stall the device callback over it.
                    let _ = writer.write(&chunk);
                }
            },
            move |err| {
                error!("Audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| VoiceError::Device(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| VoiceError::Device(format!("failed to start input stream: {e}")))?;

    info!(native_rate, channels, target_rate, "Audio capture started");

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_preserves_duration() {
        let one_second: Vec<f32> = vec![0.25; 48_000];
        let out = resample_linear(&one_second, 48_000, 24_000);
        assert_eq!(out.len(), 24_000);
        assert!((out[12_000] - 0.25).abs() < 0.001);
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 24_000, 24_000), input);
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5]);
    }
}
