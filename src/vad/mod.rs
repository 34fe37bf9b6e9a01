//! Voice-activity-driven turn recording.
//!
//! The detector is a pure state machine fed 20 ms frames; the async driver
//! that owns the microphone lives in the engine. States:
//!
//! ```text
//! grace ──first speech──▶ speaking ──trailing silence ≥ threshold──▶ stopping
//!   │                        │
//!   └──grace expires─────────┴──max duration / buffer cap──▶ stopping
//! ```
//!
//! `min_s` is floor-only: it suppresses the silence-based stop, never the
//! max-duration cap. The cap wins every tie.

pub mod energy;

use serde::Serialize;

use crate::audio::AudioBuffer;

/// Frame length the detector expects.
pub const FRAME_MS: u64 = 20;

/// Why a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Silence,
    MaxDuration,
    NoSpeech,
    BufferFull,
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silence => "silence",
            Self::MaxDuration => "max_duration",
            Self::NoSpeech => "no_speech",
            Self::BufferFull => "buffer_full",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Per-call recording parameters, already validated by the engine.
#[derive(Debug, Clone, Copy)]
pub struct RecordParams {
    pub max_s: f64,
    pub min_s: f64,
    pub silence_threshold_ms: u64,
    pub grace_period_s: f64,
    pub aggressiveness: u8,
    pub disable_vad: bool,
    /// Hard byte cap on the in-memory buffer, in samples.
    pub max_buffer_samples: usize,
}

/// A finished turn recording.
#[derive(Debug)]
pub struct Recording {
    pub buffer: AudioBuffer,
    pub stop_reason: StopReason,
}

impl Recording {
    pub fn duration_ms(&self) -> u64 {
        self.buffer.duration_ms()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Grace,
    Speaking,
}

/// Verdict after feeding one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Stop(StopReason),
}

/// Frame-accurate end-of-turn detector.
pub struct TurnDetector {
    params: RecordParams,
    sample_rate: u32,
    phase: Phase,
    samples: Vec<f32>,
    elapsed_ms: u64,
    trailing_silence_ms: u64,
}

impl TurnDetector {
    pub fn new(params: RecordParams, sample_rate: u32) -> Self {
        Self {
            params,
            sample_rate,
            phase: Phase::Grace,
            samples: Vec::new(),
            elapsed_ms: 0,
            trailing_silence_ms: 0,
        }
    }

    /// Feed one captured frame; the caller stops on the first `Stop`.
    pub fn push_frame(&mut self, frame: &[f32]) -> Verdict {
        self.samples.extend_from_slice(frame);
        self.elapsed_ms += FRAME_MS;

        if self.samples.len() >= self.params.max_buffer_samples {
            return Verdict::Stop(StopReason::BufferFull);
        }

        // The cap applies in every phase and wins over the silence rule.
        if self.elapsed_ms as f64 / 1000.0 >= self.params.max_s {
            return Verdict::Stop(StopReason::MaxDuration);
        }

        let speech = self.params.disable_vad || energy::is_speech(frame, self.params.aggressiveness);

        match self.phase {
            Phase::Grace => {
                if speech {
                    self.phase = Phase::Speaking;
                    self.trailing_silence_ms = 0;
                } else if self.elapsed_ms as f64 / 1000.0 >= self.params.grace_period_s {
                    return Verdict::Stop(StopReason::NoSpeech);
                }
                Verdict::Continue
            }
            Phase::Speaking => {
                if speech {
                    self.trailing_silence_ms = 0;
                } else {
                    self.trailing_silence_ms += FRAME_MS;
                    let past_floor = self.elapsed_ms as f64 / 1000.0 > self.params.min_s;
                    if past_floor && self.trailing_silence_ms >= self.params.silence_threshold_ms {
                        return Verdict::Stop(StopReason::Silence);
                    }
                }
                Verdict::Continue
            }
        }
    }

    /// Close the detector and hand back the captured buffer.
    pub fn finish(self, reason: StopReason) -> Recording {
        Recording {
            buffer: AudioBuffer::new(self.samples, self.sample_rate),
            stop_reason: reason,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Whether any frame has been classified as speech yet.
    pub fn heard_speech(&self) -> bool {
        self.phase == Phase::Speaking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 24_000;
    const FRAME_SAMPLES: usize = (RATE as u64 / 1000 * FRAME_MS) as usize;

    fn params() -> RecordParams {
        RecordParams {
            max_s: 30.0,
            min_s: 0.5,
            silence_threshold_ms: 1000,
            grace_period_s: 4.0,
            aggressiveness: 2,
            disable_vad: false,
            max_buffer_samples: RATE as usize * 60,
        }
    }

    fn speech_frame() -> Vec<f32> {
        vec![0.2; FRAME_SAMPLES]
    }

    fn silence_frame() -> Vec<f32> {
        vec![0.0005; FRAME_SAMPLES]
    }

    fn drive(detector: &mut TurnDetector, frame: &[f32], count: usize) -> Option<StopReason> {
        for _ in 0..count {
            if let Verdict::Stop(reason) = detector.push_frame(frame) {
                return Some(reason);
            }
        }
        None
    }

    #[test]
    fn speech_then_silence_stops_with_silence_reason() {
        // 2 s of speech followed by silence; threshold 1000 ms.
        let mut d = TurnDetector::new(params(), RATE);
        assert_eq!(drive(&mut d, &speech_frame(), 100), None);
        let reason = drive(&mut d, &silence_frame(), 200).unwrap();
        assert_eq!(reason, StopReason::Silence);
        // 2 s speech + 1 s trailing silence, frame-accurate.
        assert_eq!(d.elapsed_ms(), 3000);
        let rec = d.finish(reason);
        assert_eq!(rec.duration_ms(), 3000);
    }

    #[test]
    fn grace_expiry_without_speech_reports_no_speech() {
        let mut d = TurnDetector::new(params(), RATE);
        let reason = drive(&mut d, &silence_frame(), 400).unwrap();
        assert_eq!(reason, StopReason::NoSpeech);
        // Stops right at the 4 s grace boundary.
        assert_eq!(d.elapsed_ms(), 4000);
    }

    #[test]
    fn max_duration_caps_continuous_speech() {
        let mut p = params();
        p.max_s = 2.0;
        let mut d = TurnDetector::new(p, RATE);
        let reason = drive(&mut d, &speech_frame(), 200).unwrap();
        assert_eq!(reason, StopReason::MaxDuration);
        assert_eq!(d.elapsed_ms(), 2000);
    }

    #[test]
    fn max_duration_wins_over_silence_tie() {
        // Arrange both rules to trip on the same frame; the cap must win.
        let mut p = params();
        p.max_s = 2.0;
        p.min_s = 0.0;
        p.silence_threshold_ms = 1000;
        let mut d = TurnDetector::new(p, RATE);
        assert_eq!(drive(&mut d, &speech_frame(), 50), None); // 1 s speech
        let reason = drive(&mut d, &silence_frame(), 60).unwrap();
        assert_eq!(reason, StopReason::MaxDuration);
    }

    #[test]
    fn min_duration_floor_suppresses_early_silence_stop() {
        let mut p = params();
        p.min_s = 3.0;
        let mut d = TurnDetector::new(p, RATE);
        // 0.4 s of speech then silence: the silence rule would trip at
        // 1.4 s but the floor holds it until 3 s.
        assert_eq!(drive(&mut d, &speech_frame(), 20), None);
        let reason = drive(&mut d, &silence_frame(), 200).unwrap();
        assert_eq!(reason, StopReason::Silence);
        assert!(d.elapsed_ms() > 3000);
    }

    #[test]
    fn disable_vad_treats_every_frame_as_speech() {
        let mut p = params();
        p.disable_vad = true;
        p.max_s = 1.0;
        let mut d = TurnDetector::new(p, RATE);
        let reason = drive(&mut d, &silence_frame(), 100).unwrap();
        // Never a silence stop; runs to the cap.
        assert_eq!(reason, StopReason::MaxDuration);
        assert!(d.heard_speech());
    }

    #[test]
    fn buffer_cap_stops_the_recording() {
        let mut p = params();
        p.max_buffer_samples = FRAME_SAMPLES * 10;
        let mut d = TurnDetector::new(p, RATE);
        let reason = drive(&mut d, &speech_frame(), 20).unwrap();
        assert_eq!(reason, StopReason::BufferFull);
    }

    #[test]
    fn duration_never_exceeds_cap_by_more_than_one_frame() {
        let mut p = params();
        p.max_s = 1.01;
        let mut d = TurnDetector::new(p, RATE);
        let _ = drive(&mut d, &speech_frame(), 1000).unwrap();
        assert!(d.elapsed_ms() <= (p.max_s * 1000.0) as u64 + FRAME_MS);
    }
}
