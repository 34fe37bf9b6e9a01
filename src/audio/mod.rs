//! Audio I/O: capture, playback, chimes, device enumeration.

pub mod capture;
pub mod chime;
pub mod playback;
pub mod ring_buffer;

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

/// Mono PCM audio. Samples are f32 in [-1, 1] internally; the 16-bit LE
/// wire representation lives at the codec boundary.
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    /// 16-bit signed little-endian bytes.
    pub fn to_i16_le(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for &sample in &self.samples {
            let clamped = sample.clamp(-1.0, 1.0);
            out.extend_from_slice(&((clamped * 32767.0) as i16).to_le_bytes());
        }
        out
    }

    /// Interpret 16-bit signed little-endian bytes as mono samples.
    pub fn from_i16_le(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        Self::new(samples, sample_rate)
    }
}

/// One enumerated audio device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// List input device names; the system default is flagged.
pub fn list_input_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok());
    let mut out = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                let is_default = default_name.as_deref() == Some(name.as_str());
                out.push(DeviceInfo { name, is_default });
            }
        }
    }
    out
}

/// List output device names; the system default is flagged.
pub fn list_output_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());
    let mut out = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                let is_default = default_name.as_deref() == Some(name.as_str());
                out.push(DeviceInfo { name, is_default });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_derived_from_rate() {
        let buf = AudioBuffer::new(vec![0.0; 24_000], 24_000);
        assert_eq!(buf.duration_ms(), 1000);
        assert_eq!(AudioBuffer::empty(24_000).duration_ms(), 0);
    }

    #[test]
    fn i16_conversion_clamps_out_of_range_samples() {
        let buf = AudioBuffer::new(vec![2.0, -2.0], 24_000);
        let bytes = buf.to_i16_le();
        let back = AudioBuffer::from_i16_le(&bytes, 24_000);
        assert!(back.samples[0] > 0.99);
        assert!(back.samples[1] < -0.99);
    }
}
