//! Typed, immutable settings.
//!
//! Environment variables are authoritative; an optional JSON file
//! (`<base_dir>/voicemode.json`, snake_case keys matching the env names
//! without the `VOICEMODE_` prefix) fills in anything the environment does
//! not set; built-in defaults come last. The struct is built once at
//! process start and never mutated afterwards.

pub mod paths;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use crate::codec::AudioFormat;
use crate::error::{Result, VoiceError};
use paths::Paths;

const ENV_PREFIX: &str = "VOICEMODE_";

/// Immutable process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_dir: PathBuf,

    /// TTS endpoints in priority order.
    pub tts_base_urls: Vec<String>,
    /// STT endpoints in priority order.
    pub stt_base_urls: Vec<String>,
    /// Voice preference list, best first.
    pub tts_voices: Vec<String>,
    /// TTS model preference list, best first.
    pub tts_models: Vec<String>,

    /// Primary audio format.
    pub audio_format: AudioFormat,
    /// Per-direction overrides derived from the primary when unset.
    pub tts_audio_format: AudioFormat,
    pub stt_audio_format: AudioFormat,

    pub opus_bitrate: u32,
    pub mp3_bitrate: u32,
    pub aac_bitrate: u32,

    /// PCM sample rate for capture and playback.
    pub sample_rate: u32,

    pub streaming_enabled: bool,
    pub stream_chunk_size: usize,
    pub stream_buffer_ms: u64,
    pub stream_max_buffer_s: f64,

    /// 0 (lenient) to 3 (aggressive).
    pub vad_aggressiveness: u8,
    pub silence_threshold_ms: u64,
    pub min_recording_duration_s: f64,
    pub grace_period_s: f64,
    pub max_listen_duration_s: f64,

    pub save_audio: bool,
    pub save_transcriptions: bool,
    pub debug: bool,
    pub allow_emotions: bool,

    pub openai_api_key: Option<String>,
    pub livekit_url: Option<String>,
    pub livekit_api_key: Option<String>,
    pub livekit_api_secret: Option<String>,

    /// Named devices; `None` means the system default.
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub tts_volume: f32,

    pub generation_timeout_s: u64,
    pub playback_drain_timeout_s: u64,
    pub stt_timeout_s: u64,
    pub probe_timeout_s: u64,
    pub probe_window_s: u64,
}

/// Optional file overrides (every key optional; env always wins). The
/// base directory itself cannot come from the file: the file lives under
/// it.
#[derive(Debug, Default, Deserialize)]
struct FileOverrides {
    tts_base_urls: Option<Vec<String>>,
    stt_base_urls: Option<Vec<String>>,
    tts_voices: Option<Vec<String>>,
    tts_models: Option<Vec<String>>,
    audio_format: Option<String>,
    tts_audio_format: Option<String>,
    stt_audio_format: Option<String>,
    opus_bitrate: Option<u32>,
    mp3_bitrate: Option<u32>,
    aac_bitrate: Option<u32>,
    sample_rate: Option<u32>,
    streaming_enabled: Option<bool>,
    stream_chunk_size: Option<usize>,
    stream_buffer_ms: Option<u64>,
    stream_max_buffer: Option<f64>,
    vad_aggressiveness: Option<u8>,
    silence_threshold_ms: Option<u64>,
    min_recording_duration: Option<f64>,
    initial_silence_grace_period: Option<f64>,
    max_listen_duration: Option<f64>,
    save_audio: Option<bool>,
    save_transcriptions: Option<bool>,
    save_all: Option<bool>,
    debug: Option<bool>,
    allow_emotions: Option<bool>,
    input_device: Option<String>,
    output_device: Option<String>,
    tts_volume: Option<f32>,
    generation_timeout: Option<u64>,
    playback_drain_timeout: Option<u64>,
    stt_timeout: Option<u64>,
    probe_timeout: Option<u64>,
    probe_window: Option<u64>,
}

impl Settings {
    /// Load settings from the process environment plus the optional
    /// `voicemode.json` override file under the base directory.
    pub fn load() -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_with(&env)
    }

    /// Testable core: build settings from an explicit env map.
    pub fn load_with(env: &HashMap<String, String>) -> Result<Self> {
        // base_dir must resolve first: the override file lives under it.
        let base_dir = match env.get("VOICEMODE_BASE_DIR") {
            Some(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
            _ => paths::default_base_dir(),
        };
        let file = read_overrides(&Paths::new(&base_dir).config_file());
        Self::from_sources(env, &file, base_dir)
    }

    fn from_sources(
        env: &HashMap<String, String>,
        file: &FileOverrides,
        base_dir: PathBuf,
    ) -> Result<Self> {
        let src = Source { env };

        let tts_base_urls = src.list(
            "TTS_BASE_URLS",
            file.tts_base_urls.clone(),
            &["http://127.0.0.1:8880/v1", "https://api.openai.com/v1"],
        )?;
        let stt_base_urls = src.list(
            "STT_BASE_URLS",
            file.stt_base_urls.clone(),
            &["http://127.0.0.1:2022/v1", "https://api.openai.com/v1"],
        )?;
        let tts_voices = src.list("TTS_VOICES", file.tts_voices.clone(), &["af_sky", "alloy"])?;
        let tts_models = src.list(
            "TTS_MODELS",
            file.tts_models.clone(),
            &["tts-1", "tts-1-hd", "gpt-4o-mini-tts"],
        )?;

        let audio_format =
            src.format("AUDIO_FORMAT", file.audio_format.as_deref(), AudioFormat::Pcm)?;
        let tts_audio_format =
            src.format("TTS_AUDIO_FORMAT", file.tts_audio_format.as_deref(), audio_format)?;
        // Raw PCM is a poor upload container; default the STT direction to a
        // lossy format and let the uploader negotiate from there.
        let stt_default = if audio_format == AudioFormat::Pcm {
            AudioFormat::Mp3
        } else {
            audio_format
        };
        let stt_audio_format =
            src.format("STT_AUDIO_FORMAT", file.stt_audio_format.as_deref(), stt_default)?;

        let save_all = src.bool("SAVE_ALL", file.save_all, false)?;

        let settings = Self {
            base_dir,
            tts_base_urls,
            stt_base_urls,
            tts_voices,
            tts_models,
            audio_format,
            tts_audio_format,
            stt_audio_format,
            opus_bitrate: src.u32("OPUS_BITRATE", file.opus_bitrate, 32_000)?,
            mp3_bitrate: src.u32("MP3_BITRATE", file.mp3_bitrate, 64_000)?,
            aac_bitrate: src.u32("AAC_BITRATE", file.aac_bitrate, 64_000)?,
            sample_rate: src.u32("SAMPLE_RATE", file.sample_rate, 24_000)?,
            streaming_enabled: src.bool("STREAMING_ENABLED", file.streaming_enabled, true)?,
            stream_chunk_size: src.u32("STREAM_CHUNK_SIZE", file.stream_chunk_size.map(|v| v as u32), 4096)?
                as usize,
            stream_buffer_ms: src.u64("STREAM_BUFFER_MS", file.stream_buffer_ms, 150)?,
            stream_max_buffer_s: src.f64("STREAM_MAX_BUFFER", file.stream_max_buffer, 10.0)?,
            vad_aggressiveness: src.u32("VAD_AGGRESSIVENESS", file.vad_aggressiveness.map(u32::from), 2)?
                as u8,
            silence_threshold_ms: src.u64("SILENCE_THRESHOLD_MS", file.silence_threshold_ms, 1000)?,
            min_recording_duration_s: src.f64(
                "MIN_RECORDING_DURATION",
                file.min_recording_duration,
                0.5,
            )?,
            grace_period_s: src.f64(
                "INITIAL_SILENCE_GRACE_PERIOD",
                file.initial_silence_grace_period,
                4.0,
            )?,
            max_listen_duration_s: src.f64("MAX_LISTEN_DURATION", file.max_listen_duration, 120.0)?,
            save_audio: save_all || src.bool("SAVE_AUDIO", file.save_audio, false)?,
            save_transcriptions: save_all
                || src.bool("SAVE_TRANSCRIPTIONS", file.save_transcriptions, false)?,
            debug: src.bool("DEBUG", file.debug, false)?,
            allow_emotions: src.bool("ALLOW_EMOTIONS", file.allow_emotions, false)?,
            openai_api_key: env.get("OPENAI_API_KEY").cloned().filter(|s| !s.is_empty()),
            livekit_url: env.get("LIVEKIT_URL").cloned().filter(|s| !s.is_empty()),
            livekit_api_key: env.get("LIVEKIT_API_KEY").cloned().filter(|s| !s.is_empty()),
            livekit_api_secret: env
                .get("LIVEKIT_API_SECRET")
                .cloned()
                .filter(|s| !s.is_empty()),
            input_device: src.string("INPUT_DEVICE", file.input_device.clone()),
            output_device: src.string("OUTPUT_DEVICE", file.output_device.clone()),
            tts_volume: src.f64("TTS_VOLUME", file.tts_volume.map(f64::from), 1.0)? as f32,
            generation_timeout_s: src.u64("GENERATION_TIMEOUT", file.generation_timeout, 30)?,
            playback_drain_timeout_s: src.u64(
                "PLAYBACK_DRAIN_TIMEOUT",
                file.playback_drain_timeout,
                60,
            )?,
            stt_timeout_s: src.u64("STT_TIMEOUT", file.stt_timeout, 60)?,
            probe_timeout_s: src.u64("PROBE_TIMEOUT", file.probe_timeout, 2)?,
            probe_window_s: src.u64("PROBE_WINDOW", file.probe_window, 60)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.vad_aggressiveness > 3 {
            return Err(VoiceError::Config(format!(
                "VOICEMODE_VAD_AGGRESSIVENESS must be 0-3, got {}",
                self.vad_aggressiveness
            )));
        }
        if self.sample_rate == 0 {
            return Err(VoiceError::Config("VOICEMODE_SAMPLE_RATE must be > 0".into()));
        }
        if self.stream_buffer_ms < 10 {
            return Err(VoiceError::Config(
                "VOICEMODE_STREAM_BUFFER_MS must be at least 10".into(),
            ));
        }
        if self.stream_max_buffer_s <= 0.0 {
            return Err(VoiceError::Config(
                "VOICEMODE_STREAM_MAX_BUFFER must be positive".into(),
            ));
        }
        for (name, v) in [
            ("VOICEMODE_OPUS_BITRATE", self.opus_bitrate),
            ("VOICEMODE_MP3_BITRATE", self.mp3_bitrate),
            ("VOICEMODE_AAC_BITRATE", self.aac_bitrate),
        ] {
            if v == 0 {
                return Err(VoiceError::Config(format!("{name} must be > 0")));
            }
        }
        if self.max_listen_duration_s <= 0.0 || self.grace_period_s < 0.0 {
            return Err(VoiceError::Config("listen durations must be positive".into()));
        }
        if self.tts_base_urls.is_empty() || self.stt_base_urls.is_empty() {
            return Err(VoiceError::Config("endpoint URL lists must not be empty".into()));
        }
        Ok(())
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.base_dir)
    }
}

/// Env lookup with the `VOICEMODE_` prefix; file values are passed in per
/// field so env > file > default stays visible at each call site.
struct Source<'a> {
    env: &'a HashMap<String, String>,
}

impl Source<'_> {
    fn raw(&self, key: &str) -> Option<&str> {
        self.env
            .get(&format!("{ENV_PREFIX}{key}"))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn string(&self, key: &str, file_val: Option<String>) -> Option<String> {
        self.raw(key).map(str::to_string).or(file_val)
    }

    fn list(&self, key: &str, file_val: Option<Vec<String>>, default: &[&str]) -> Result<Vec<String>> {
        if let Some(raw) = self.raw(key) {
            let items: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if items.is_empty() {
                return Err(VoiceError::Config(format!(
                    "{ENV_PREFIX}{key} is set but contains no entries"
                )));
            }
            return Ok(items);
        }
        if let Some(items) = file_val {
            let items: Vec<String> = items
                .into_iter()
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !items.is_empty() {
                return Ok(items);
            }
        }
        Ok(default.iter().map(|s| s.to_string()).collect())
    }

    fn bool(&self, key: &str, file_val: Option<bool>, default: bool) -> Result<bool> {
        match self.raw(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(VoiceError::Config(format!(
                    "{ENV_PREFIX}{key}: expected a boolean, got {other:?}"
                ))),
            },
            None => Ok(file_val.unwrap_or(default)),
        }
    }

    fn u32(&self, key: &str, file_val: Option<u32>, default: u32) -> Result<u32> {
        match self.raw(key) {
            Some(raw) => raw.parse().map_err(|_| {
                VoiceError::Config(format!("{ENV_PREFIX}{key}: expected an integer, got {raw:?}"))
            }),
            None => Ok(file_val.unwrap_or(default)),
        }
    }

    fn u64(&self, key: &str, file_val: Option<u64>, default: u64) -> Result<u64> {
        match self.raw(key) {
            Some(raw) => raw.parse().map_err(|_| {
                VoiceError::Config(format!("{ENV_PREFIX}{key}: expected an integer, got {raw:?}"))
            }),
            None => Ok(file_val.unwrap_or(default)),
        }
    }

    fn f64(&self, key: &str, file_val: Option<f64>, default: f64) -> Result<f64> {
        match self.raw(key) {
            Some(raw) => raw.parse().map_err(|_| {
                VoiceError::Config(format!("{ENV_PREFIX}{key}: expected a number, got {raw:?}"))
            }),
            None => Ok(file_val.unwrap_or(default)),
        }
    }

    fn format(&self, key: &str, file_val: Option<&str>, default: AudioFormat) -> Result<AudioFormat> {
        let raw = match self.raw(key) {
            Some(r) => r,
            None => match file_val {
                Some(f) => f,
                None => return Ok(default),
            },
        };
        raw.parse().map_err(|_| {
            VoiceError::Config(format!("{ENV_PREFIX}{key}: unknown audio format {raw:?}"))
        })
    }
}

fn read_overrides(path: &std::path::Path) -> FileOverrides {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                FileOverrides::default()
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            FileOverrides::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let s = Settings::load_with(&env(&[("VOICEMODE_BASE_DIR", "/tmp/vm")])).unwrap();
        assert_eq!(s.sample_rate, 24_000);
        assert_eq!(s.audio_format, AudioFormat::Pcm);
        // STT direction falls back to a lossy format when the primary is raw pcm.
        assert_eq!(s.stt_audio_format, AudioFormat::Mp3);
        assert_eq!(s.tts_base_urls.len(), 2);
        assert_eq!(s.vad_aggressiveness, 2);
        assert!(s.streaming_enabled);
        assert!(!s.allow_emotions);
    }

    #[test]
    fn env_lists_are_comma_separated_and_trimmed() {
        let s = Settings::load_with(&env(&[
            ("VOICEMODE_BASE_DIR", "/tmp/vm"),
            (
                "VOICEMODE_TTS_BASE_URLS",
                " http://127.0.0.1:8880/v1/ , https://api.openai.com/v1 ",
            ),
            ("VOICEMODE_TTS_VOICES", "af_sky,af_bella"),
        ]))
        .unwrap();
        assert_eq!(
            s.tts_base_urls,
            vec!["http://127.0.0.1:8880/v1", "https://api.openai.com/v1"]
        );
        assert_eq!(s.tts_voices, vec!["af_sky", "af_bella"]);
    }

    #[test]
    fn non_pcm_primary_keeps_stt_format() {
        let s = Settings::load_with(&env(&[
            ("VOICEMODE_BASE_DIR", "/tmp/vm"),
            ("VOICEMODE_AUDIO_FORMAT", "wav"),
        ]))
        .unwrap();
        assert_eq!(s.stt_audio_format, AudioFormat::Wav);
        assert_eq!(s.tts_audio_format, AudioFormat::Wav);
    }

    #[test]
    fn malformed_values_fail_with_config_error() {
        let e = Settings::load_with(&env(&[
            ("VOICEMODE_BASE_DIR", "/tmp/vm"),
            ("VOICEMODE_VAD_AGGRESSIVENESS", "9"),
        ]))
        .unwrap_err();
        assert_eq!(e.kind(), "config_error");

        let e = Settings::load_with(&env(&[
            ("VOICEMODE_BASE_DIR", "/tmp/vm"),
            ("VOICEMODE_STREAM_BUFFER_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(e.to_string().contains("STREAM_BUFFER_MS"));

        let e = Settings::load_with(&env(&[
            ("VOICEMODE_BASE_DIR", "/tmp/vm"),
            ("VOICEMODE_AUDIO_FORMAT", "midi"),
        ]))
        .unwrap_err();
        assert!(e.to_string().contains("midi"));
    }

    #[test]
    fn save_all_forces_both_save_flags() {
        let s = Settings::load_with(&env(&[
            ("VOICEMODE_BASE_DIR", "/tmp/vm"),
            ("VOICEMODE_SAVE_ALL", "true"),
        ]))
        .unwrap();
        assert!(s.save_audio);
        assert!(s.save_transcriptions);
    }

    #[test]
    fn file_overrides_lose_to_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("voicemode.json"),
            r#"{"sample_rate": 16000, "tts_voices": ["am_adam"]}"#,
        )
        .unwrap();
        let s = Settings::load_with(&env(&[
            ("VOICEMODE_BASE_DIR", dir.path().to_str().unwrap()),
            ("VOICEMODE_SAMPLE_RATE", "48000"),
        ]))
        .unwrap();
        assert_eq!(s.sample_rate, 48_000);
        // No env override for voices: the file wins over the default.
        assert_eq!(s.tts_voices, vec!["am_adam"]);
    }
}
