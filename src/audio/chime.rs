//! Start/stop chimes.
//!
//! Short sine tones with leading and trailing silence so Bluetooth outputs
//! that wake on the first sample do not clip the tone.

use std::time::Duration;

use tracing::warn;

use super::playback::AudioPlayer;

/// Which chime to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChimeKind {
    /// C5, played just before the microphone opens.
    Start,
    /// A4, played after the recording closes.
    Stop,
}

impl ChimeKind {
    fn frequency_hz(&self) -> f32 {
        match self {
            Self::Start => 523.25,
            Self::Stop => 440.0,
        }
    }
}

const TONE_MS: u64 = 300;
const LEAD_SILENCE_MS: u64 = 50;
const TAIL_SILENCE_MS: u64 = 200;
const FADE_MS: u64 = 20;

/// Generate the chime PCM: silence, faded sine, silence.
pub fn chime_samples(kind: ChimeKind, sample_rate: u32) -> Vec<f32> {
    let ms_to_samples = |ms: u64| (ms * sample_rate as u64 / 1000) as usize;
    let lead = ms_to_samples(LEAD_SILENCE_MS);
    let tone = ms_to_samples(TONE_MS);
    let tail = ms_to_samples(TAIL_SILENCE_MS);
    let fade = ms_to_samples(FADE_MS).max(1);

    let mut out = vec![0.0f32; lead];
    let freq = kind.frequency_hz();
    for i in 0..tone {
        let t = i as f32 / sample_rate as f32;
        let mut sample = (t * freq * 2.0 * std::f32::consts::PI).sin() * 0.4;
        if i < fade {
            sample *= i as f32 / fade as f32;
        }
        if i >= tone - fade {
            sample *= (tone - i) as f32 / fade as f32;
        }
        out.push(sample);
    }
    out.extend(std::iter::repeat(0.0).take(tail));
    out
}

/// Total chime length including the silence padding.
pub fn chime_duration() -> Duration {
    Duration::from_millis(LEAD_SILENCE_MS + TONE_MS + TAIL_SILENCE_MS)
}

/// Play a chime synchronously through the shared player.
///
/// A playback problem downgrades to a warning; chimes are advisory and
/// never abort the turn.
pub fn play_chime(player: &AudioPlayer, kind: ChimeKind, sample_rate: u32) {
    let samples = chime_samples(kind, sample_rate);
    player.append_pcm(samples, sample_rate);
    let drained = player.drain_blocking(chime_duration() + Duration::from_millis(500), &|| false);
    if !drained {
        warn!(?kind, "Chime playback did not drain in time");
    }
}
