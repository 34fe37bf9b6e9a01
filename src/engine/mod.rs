//! The turn engine: one complete TTS → record → STT cycle per converse
//! call.
//!
//! Voice hardware is exclusive, so a single turn mutex serializes turns;
//! a second call fails immediately with `Busy`. Per-endpoint failures are
//! retried across the registry's ordered list; the engine is the only
//! layer that converts them into failover or an aggregated error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audio::chime::{self, ChimeKind};
use crate::audio::playback::AudioPlayer;
use crate::audio::ring_buffer::capture_channel;
use crate::audio::{capture, AudioBuffer};
use crate::codec::AudioFormat;
use crate::config::Settings;
use crate::error::{Result, VoiceError};
use crate::logging::stats::StatsWindow;
use crate::logging::{EventLog, ExchangeRecord, RecordMetrics, SttMetrics, TtsMetrics, SCHEMA_VERSION};
use crate::providers::Registry;
use crate::services::Supervisor;
use crate::stt::SttUploader;
use crate::tts::{SpeakRequest, TtsStreamer};
use crate::vad::{RecordParams, Recording, StopReason, TurnDetector, Verdict, FRAME_MS};

/// Audio transport selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Auto,
    Local,
    Room,
}

impl Transport {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "local" => Ok(Self::Local),
            "room" => Ok(Self::Room),
            other => Err(VoiceError::Config(format!(
                "transport must be auto|local|room, got {other:?}"
            ))),
        }
    }
}

/// Arguments for one converse call, defaulted at the MCP boundary.
#[derive(Debug, Clone)]
pub struct ConverseArgs {
    pub message: String,
    pub wait_for_response: bool,
    pub listen_duration_min_s: f64,
    pub listen_duration_max_s: f64,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub audio_format: Option<AudioFormat>,
    pub speed: f64,
    pub instructions: Option<String>,
    pub disable_vad: bool,
    pub vad_aggressiveness: Option<u8>,
    pub chime_enabled: bool,
    pub skip_tts: bool,
    pub transport: Transport,
}

impl Default for ConverseArgs {
    fn default() -> Self {
        Self {
            message: String::new(),
            wait_for_response: true,
            listen_duration_min_s: 0.0,
            listen_duration_max_s: 120.0,
            voice: None,
            model: None,
            audio_format: None,
            speed: 1.0,
            instructions: None,
            disable_vad: false,
            vad_aggressiveness: None,
            chime_enabled: true,
            skip_tts: false,
            transport: Transport::Auto,
        }
    }
}

/// Arguments for a listen-only call.
#[derive(Debug, Clone)]
pub struct ListenArgs {
    pub listen_duration_min_s: f64,
    pub listen_duration_max_s: f64,
    pub disable_vad: bool,
    pub vad_aggressiveness: Option<u8>,
    pub chime_enabled: bool,
}

impl Default for ListenArgs {
    fn default() -> Self {
        Self {
            listen_duration_min_s: 0.0,
            listen_duration_max_s: 120.0,
            disable_vad: false,
            vad_aggressiveness: None,
            chime_enabled: true,
        }
    }
}

/// Per-turn metric block surfaced to the caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfa_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_gen_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_play_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_ms: Option<u64>,
    pub total_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_provider: Option<String>,
}

/// Result of one converse call.
#[derive(Debug, Clone, Serialize)]
pub struct ConverseResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub spoken: bool,
    pub metrics: TurnMetrics,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Root object owning every shared subsystem. One per process, built by
/// the MCP surface; teardown flushes the logger.
pub struct Engine {
    pub settings: Arc<Settings>,
    registry: Registry,
    logger: EventLog,
    stats: StatsWindow,
    supervisor: Supervisor,
    tts: TtsStreamer,
    stt: SttUploader,
    turn_lock: tokio::sync::Mutex<()>,
}

impl Engine {
    pub fn new(settings: Settings) -> Result<Arc<Self>> {
        let settings = Arc::new(settings);
        settings
            .paths()
            .ensure_all()
            .map_err(|e| VoiceError::Config(format!("cannot create base directories: {e}")))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VoiceError::Internal(format!("http client: {e}")))?;

        Ok(Arc::new(Self {
            registry: Registry::from_settings(&settings, client.clone()),
            logger: EventLog::new(&settings.paths()),
            stats: StatsWindow::new(),
            supervisor: Supervisor::new(settings.clone(), client.clone()),
            tts: TtsStreamer::new(client.clone(), settings.clone()),
            stt: SttUploader::new(client, settings.clone()),
            turn_lock: tokio::sync::Mutex::new(()),
            settings,
        }))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn logger(&self) -> &EventLog {
        &self.logger
    }

    pub fn stats(&self) -> &StatsWindow {
        &self.stats
    }

    pub async fn shutdown(&self) {
        self.logger.shutdown().await;
    }

    /// One full voice turn. See the module docs for the state sequence.
    pub async fn converse(&self, args: ConverseArgs, cancel: CancellationToken) -> Result<ConverseResult> {
        let _turn = self.turn_lock.try_lock().map_err(|_| VoiceError::Busy)?;
        validate_converse(&args)?;

        if args.transport == Transport::Room {
            return Err(VoiceError::NoSuitableEndpoint(
                "room transport is not configured on this host; use transport=local".into(),
            ));
        }

        let conversation_id = self.logger.conversation_id();
        let started_at = Utc::now();
        let t0 = Instant::now();
        self.logger.log_event(
            "turn_started",
            json!({
                "message_len": args.message.len(),
                "wait_for_response": args.wait_for_response,
                "skip_tts": args.skip_tts,
            }),
        );

        let mut metrics = TurnMetrics::default();
        let mut tts_metrics: Option<TtsMetrics> = None;
        let mut tts_error: Option<String> = None;
        let mut spoken = false;

        // A turn with nothing to speak and nothing to record never touches
        // the audio device.
        if !args.wait_for_response && (args.message.is_empty() || args.skip_tts) {
            metrics.total_ms = t0.elapsed().as_millis() as u64;
            self.finish_exchange(&conversation_id, started_at, None, None, None, "success", None);
            return Ok(ConverseResult {
                text: None,
                spoken: false,
                metrics,
                outcome: "success".into(),
                reason: None,
                error: None,
            });
        }

        // The output device is shared by chimes and playback and is owned
        // by this turn.
        let player = Arc::new(AudioPlayer::open(
            self.settings.output_device.as_deref(),
            self.settings.tts_volume,
        )?);

        if !args.message.is_empty() && !args.skip_tts {
            match self
                .speak_with_failover(&args, &conversation_id, &player, &cancel)
                .await
            {
                Ok(outcome) => {
                    spoken = !outcome.cancelled;
                    metrics.ttfa_ms = outcome.ttfa_ms;
                    metrics.tts_gen_ms = Some(outcome.generation_ms);
                    metrics.tts_play_ms = Some(outcome.playback_ms);
                    metrics.tts_provider = outcome.provider.clone();
                    tts_metrics = Some(outcome.record);
                    if outcome.cancelled {
                        self.logger.log_event("tts_cancelled", json!({}));
                        metrics.total_ms = t0.elapsed().as_millis() as u64;
                        let result = ConverseResult {
                            text: None,
                            spoken: false,
                            metrics,
                            outcome: "cancelled".into(),
                            reason: None,
                            error: None,
                        };
                        self.finish_exchange(
                            &conversation_id,
                            started_at,
                            tts_metrics,
                            None,
                            None,
                            "cancelled",
                            None,
                        );
                        return Ok(result);
                    }
                }
                Err(e) => {
                    // TTS exhausted every endpoint; the turn still listens
                    // so the human can answer after the chime.
                    warn!("TTS leg failed: {}", e);
                    self.logger.log_event("tts_failed", json!({"error": e.to_string()}));
                    tts_error = Some(e.to_string());
                }
            }
        }

        if !args.wait_for_response {
            metrics.total_ms = t0.elapsed().as_millis() as u64;
            let outcome = if tts_error.is_some() { "tts_failed" } else { "success" };
            self.finish_exchange(
                &conversation_id,
                started_at,
                tts_metrics,
                None,
                None,
                outcome,
                tts_error.clone(),
            );
            return Ok(ConverseResult {
                text: None,
                spoken,
                metrics,
                outcome: outcome.into(),
                reason: None,
                error: tts_error,
            });
        }

        // Recording leg.
        let params = self.record_params(
            args.listen_duration_min_s,
            args.listen_duration_max_s,
            args.disable_vad,
            args.vad_aggressiveness,
        );
        self.logger.log_event(
            "record_start",
            json!({
                "max_s": params.max_s,
                "min_s": params.min_s,
                "disable_vad": params.disable_vad,
            }),
        );
        let recording = self
            .record_turn(params.clone(), player.clone(), args.chime_enabled, cancel.clone())
            .await?;
        let record_ms = recording.duration_ms();
        metrics.record_ms = Some(record_ms);
        self.logger.log_event(
            "record_end",
            json!({
                "duration_ms": record_ms,
                "stopped_reason": recording.stop_reason.as_str(),
            }),
        );
        let record_metrics = RecordMetrics {
            duration_ms: record_ms,
            stopped_reason: recording.stop_reason.as_str().into(),
            bytes: recording.buffer.samples.len() as u64 * 2,
        };

        if recording.stop_reason == StopReason::Cancelled {
            metrics.total_ms = t0.elapsed().as_millis() as u64;
            self.finish_exchange(
                &conversation_id,
                started_at,
                tts_metrics,
                Some(record_metrics),
                None,
                "cancelled",
                None,
            );
            return Ok(ConverseResult {
                text: None,
                spoken,
                metrics,
                outcome: "cancelled".into(),
                reason: None,
                error: None,
            });
        }

        let too_short = (record_ms as f64) < params.min_s * 1000.0;
        if recording.stop_reason == StopReason::NoSpeech || recording.buffer.is_empty() || too_short
        {
            metrics.total_ms = t0.elapsed().as_millis() as u64;
            self.finish_exchange(
                &conversation_id,
                started_at,
                tts_metrics,
                Some(record_metrics),
                None,
                "no_speech",
                None,
            );
            return Ok(ConverseResult {
                text: Some(String::new()),
                spoken,
                metrics,
                outcome: "no_speech".into(),
                reason: Some("no_speech".into()),
                error: tts_error,
            });
        }

        // Transcription leg.
        match self
            .transcribe_with_failover(&recording.buffer, &conversation_id)
            .await
        {
            Ok((outcome, stt_metrics)) => {
                metrics.stt_ms = Some(outcome.latency_ms);
                metrics.stt_provider = Some(outcome.provider.clone());
                metrics.total_ms = t0.elapsed().as_millis() as u64;
                let tag = if tts_error.is_some() { "tts_failed" } else { "success" };
                self.finish_exchange(
                    &conversation_id,
                    started_at,
                    tts_metrics,
                    Some(record_metrics),
                    Some(stt_metrics),
                    tag,
                    tts_error.clone(),
                );
                Ok(ConverseResult {
                    text: Some(outcome.text),
                    spoken,
                    metrics,
                    outcome: tag.into(),
                    reason: None,
                    error: tts_error,
                })
            }
            Err(e) => {
                self.logger.log_event("stt_failed", json!({"error": e.to_string()}));
                metrics.total_ms = t0.elapsed().as_millis() as u64;
                self.finish_exchange(
                    &conversation_id,
                    started_at,
                    tts_metrics,
                    Some(record_metrics),
                    None,
                    "stt_failed",
                    Some(e.to_string()),
                );
                Ok(ConverseResult {
                    text: Some(String::new()),
                    spoken,
                    metrics,
                    outcome: "stt_failed".into(),
                    reason: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Record and transcribe without a synthesis leg.
    pub async fn listen(&self, args: ListenArgs, cancel: CancellationToken) -> Result<ConverseResult> {
        let converse_args = ConverseArgs {
            message: String::new(),
            wait_for_response: true,
            listen_duration_min_s: args.listen_duration_min_s,
            listen_duration_max_s: args.listen_duration_max_s,
            disable_vad: args.disable_vad,
            vad_aggressiveness: args.vad_aggressiveness,
            chime_enabled: args.chime_enabled,
            skip_tts: true,
            ..Default::default()
        };
        self.converse(converse_args, cancel).await
    }

    /// TTS failover loop: iterate the registry's ordered eligible list,
    /// reporting each failure back so the next round skips it.
    async fn speak_with_failover(
        &self,
        args: &ConverseArgs,
        conversation_id: &str,
        player: &Arc<AudioPlayer>,
        cancel: &CancellationToken,
    ) -> Result<SpeakLegOutcome> {
        let (instructions, requires_emotion) = self.resolve_instructions(args.instructions.clone());
        let mut last_err: Option<VoiceError> = None;
        let mut attempts = 0;

        loop {
            let selection = match self.registry.select_for_tts(
                args.voice.as_deref(),
                args.model.as_deref(),
                requires_emotion,
            ) {
                Ok(sel) => sel,
                Err(e) => {
                    // Nothing eligible is left; surface the aggregate.
                    return Err(match last_err {
                        Some(inner) => VoiceError::TtsFailed {
                            endpoint: format!("{attempts} endpoint(s)"),
                            reason: inner.to_string(),
                        },
                        None => e,
                    });
                }
            };
            attempts += 1;

            let format = self
                .tts
                .negotiate_format(&selection.endpoint, args.audio_format);
            let request = SpeakRequest {
                text: args.message.clone(),
                voice: selection.voice.clone(),
                model: selection.model.clone(),
                format,
                speed: args.speed as f32,
                instructions: instructions.clone(),
            };

            self.logger.log_event(
                "tts_start",
                json!({
                    "endpoint": selection.endpoint.base_url,
                    "provider": selection.endpoint.provider_type.as_str(),
                    "voice": request.voice,
                    "model": request.model,
                    "format": request.format.as_str(),
                }),
            );

            match self
                .tts
                .speak(&selection.endpoint, &request, player, conversation_id, cancel)
                .await
            {
                Ok(outcome) => {
                    self.registry.mark_ok(&selection.endpoint);
                    if let Some(ttfa) = outcome.ttfa_ms {
                        self.logger.log_event("ttfa", json!({"ttfa_ms": ttfa}));
                    }
                    self.logger.log_event(
                        "tts_end",
                        json!({
                            "generation_ms": outcome.generation_ms,
                            "playback_ms": outcome.playback_ms,
                            "bytes": outcome.bytes,
                        }),
                    );
                    return Ok(SpeakLegOutcome {
                        ttfa_ms: outcome.ttfa_ms,
                        generation_ms: outcome.generation_ms,
                        playback_ms: outcome.playback_ms,
                        cancelled: outcome.cancelled,
                        provider: Some(selection.endpoint.provider_type.as_str().to_string()),
                        record: TtsMetrics {
                            provider: selection.endpoint.provider_type.as_str().into(),
                            voice: request.voice,
                            model: request.model,
                            audio_format: request.format.as_str().into(),
                            ttfa_ms: outcome.ttfa_ms,
                            generation_ms: outcome.generation_ms,
                            playback_ms: outcome.playback_ms,
                            bytes: outcome.bytes,
                        },
                    });
                }
                Err(VoiceError::Cancelled) => return Err(VoiceError::Cancelled),
                Err(e) => {
                    warn!(endpoint = %selection.endpoint.base_url, "TTS attempt failed: {}", e);
                    self.logger.log_event(
                        "tts_endpoint_failed",
                        json!({"endpoint": selection.endpoint.base_url, "error": e.to_string()}),
                    );
                    self.registry.mark_failed(&selection.endpoint);
                    last_err = Some(e);
                }
            }
        }
    }

    /// STT failover loop, shaped like the TTS one.
    async fn transcribe_with_failover(
        &self,
        buffer: &AudioBuffer,
        conversation_id: &str,
    ) -> Result<(crate::stt::SttOutcome, SttMetrics)> {
        let mut last_err: Option<VoiceError> = None;
        let mut attempts = 0;

        loop {
            let selection = match self.registry.select_for_stt(None) {
                Ok(sel) => sel,
                Err(e) => {
                    return Err(match last_err {
                        Some(inner) => VoiceError::SttFailed {
                            endpoint: format!("{attempts} endpoint(s)"),
                            reason: inner.to_string(),
                        },
                        None => e,
                    });
                }
            };
            attempts += 1;

            let format = self.stt.negotiate_format(&selection.endpoint);
            self.logger.log_event(
                "stt_start",
                json!({
                    "endpoint": selection.endpoint.base_url,
                    "provider": selection.endpoint.provider_type.as_str(),
                    "model": selection.model,
                    "format": format.as_str(),
                }),
            );

            match self
                .stt
                .transcribe(&selection.endpoint, &selection.model, format, buffer, conversation_id)
                .await
            {
                Ok(outcome) => {
                    self.registry.mark_ok(&selection.endpoint);
                    self.logger.log_event(
                        "stt_end",
                        json!({"latency_ms": outcome.latency_ms, "text_len": outcome.text.len()}),
                    );
                    let metrics = SttMetrics {
                        provider: outcome.provider.clone(),
                        model: outcome.model.clone(),
                        audio_format: outcome.audio_format.as_str().into(),
                        latency_ms: outcome.latency_ms,
                        text_len: outcome.text.len(),
                    };
                    return Ok((outcome, metrics));
                }
                Err(e) => {
                    warn!(endpoint = %selection.endpoint.base_url, "STT attempt failed: {}", e);
                    self.logger.log_event(
                        "stt_endpoint_failed",
                        json!({"endpoint": selection.endpoint.base_url, "error": e.to_string()}),
                    );
                    self.registry.mark_failed(&selection.endpoint);
                    last_err = Some(e);
                }
            }
        }
    }

    /// Drop instructions when emotions are disabled; requesting them only
    /// constrains model selection when they survive the gate.
    fn resolve_instructions(&self, instructions: Option<String>) -> (Option<String>, bool) {
        match instructions {
            Some(_) if !self.settings.allow_emotions => {
                warn!("TTS instructions dropped: emotions are disabled");
                self.logger.log_event(
                    "emotion_gated",
                    json!({"reason": "allow_emotions=false"}),
                );
                (None, false)
            }
            Some(text) => (Some(text), true),
            None => (None, false),
        }
    }

    fn record_params(
        &self,
        min_s: f64,
        max_s: f64,
        disable_vad: bool,
        aggressiveness: Option<u8>,
    ) -> RecordParams {
        // Ring-limited in-memory store: the byte cap is
        // stream_max_buffer_s x sample_rate x 2, i.e. this many samples.
        let max_buffer_samples =
            (self.settings.stream_max_buffer_s * self.settings.sample_rate as f64) as usize;
        RecordParams {
            max_s,
            // The configured floor holds unless the call asks for more.
            min_s: min_s.max(self.settings.min_recording_duration_s),
            silence_threshold_ms: self.settings.silence_threshold_ms,
            grace_period_s: self.settings.grace_period_s,
            aggressiveness: aggressiveness.unwrap_or(self.settings.vad_aggressiveness),
            disable_vad,
            max_buffer_samples,
        }
    }

    /// Drive the microphone for one turn on a blocking thread. The cpal
    /// stream handle must stay on that thread, so chime, capture and the
    /// detector loop all run inside `spawn_blocking`.
    async fn record_turn(
        &self,
        params: RecordParams,
        player: Arc<AudioPlayer>,
        chime_enabled: bool,
        cancel: CancellationToken,
    ) -> Result<Recording> {
        let rate = self.settings.sample_rate;
        let input_device = self.settings.input_device.clone();

        let recording = tokio::task::spawn_blocking(move || -> Result<Recording> {
            if chime_enabled {
                chime::play_chime(&player, ChimeKind::Start, rate);
            }

            let (writer, mut reader) = capture_channel(rate, 30);
            let stream = capture::start_capture(writer, input_device.as_deref(), rate)?;

            let frame_samples = (rate as usize / 1000) * FRAME_MS as usize;
            // Wall-clock backstop for a device that stops delivering frames.
            let deadline = Instant::now()
                + Duration::from_secs_f64(params.max_s + params.grace_period_s + 2.0);

            let mut detector = TurnDetector::new(params, rate);
            let mut hold: Vec<f32> = Vec::with_capacity(frame_samples * 4);
            let mut frame = vec![0.0f32; frame_samples];

            let reason = 'outer: loop {
                if cancel.is_cancelled() {
                    break StopReason::Cancelled;
                }
                if Instant::now() > deadline {
                    break StopReason::MaxDuration;
                }

                let drained = reader.take_all();
                if drained.is_empty() {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                hold.extend_from_slice(&drained);

                while hold.len() >= frame_samples {
                    frame.copy_from_slice(&hold[..frame_samples]);
                    hold.drain(..frame_samples);
                    if let Verdict::Stop(reason) = detector.push_frame(&frame) {
                        break 'outer reason;
                    }
                }
            };

            drop(stream);
            if chime_enabled {
                chime::play_chime(&player, ChimeKind::Stop, rate);
            }

            Ok(detector.finish(reason))
        })
        .await
        .map_err(|e| VoiceError::Internal(format!("recording task panicked: {e}")))??;

        info!(
            duration_ms = recording.duration_ms(),
            reason = recording.stop_reason.as_str(),
            "Recording finished"
        );
        Ok(recording)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_exchange(
        &self,
        conversation_id: &str,
        started_at: chrono::DateTime<Utc>,
        tts: Option<TtsMetrics>,
        record: Option<RecordMetrics>,
        stt: Option<SttMetrics>,
        outcome: &str,
        error: Option<String>,
    ) {
        let record = ExchangeRecord {
            schema_version: SCHEMA_VERSION,
            conversation_id: conversation_id.to_string(),
            started_at,
            ended_at: Utc::now(),
            tts,
            record,
            stt,
            outcome: outcome.to_string(),
            error,
        };
        self.logger.append_exchange(&record);
        self.stats.push(record);
        self.logger.log_event("turn_end", json!({"outcome": outcome}));
    }
}

/// Outcome of the whole TTS leg after failover.
struct SpeakLegOutcome {
    ttfa_ms: Option<u64>,
    generation_ms: u64,
    playback_ms: u64,
    cancelled: bool,
    provider: Option<String>,
    record: TtsMetrics,
}

/// Boundary validation; every range from the contract table.
pub fn validate_converse(args: &ConverseArgs) -> Result<()> {
    if args.message.is_empty() && !args.wait_for_response {
        return Err(VoiceError::Config(
            "message may be empty only when wait_for_response is true".into(),
        ));
    }
    if !(1.0..=300.0).contains(&args.listen_duration_max_s) {
        return Err(VoiceError::Config(format!(
            "listen_duration_max must be 1-300 seconds, got {}",
            args.listen_duration_max_s
        )));
    }
    if args.listen_duration_min_s < 0.0 || args.listen_duration_min_s > args.listen_duration_max_s {
        return Err(VoiceError::Config(format!(
            "listen_duration_min must be 0-{}, got {}",
            args.listen_duration_max_s, args.listen_duration_min_s
        )));
    }
    if !(0.25..=4.0).contains(&args.speed) {
        return Err(VoiceError::Config(format!(
            "speed must be 0.25-4.0, got {}",
            args.speed
        )));
    }
    if let Some(a) = args.vad_aggressiveness {
        if a > 3 {
            return Err(VoiceError::Config(format!(
                "vad_aggressiveness must be 0-3, got {a}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_requires_wait_for_response() {
        let mut args = ConverseArgs::default();
        assert!(validate_converse(&args).is_ok());
        args.wait_for_response = false;
        assert_eq!(validate_converse(&args).unwrap_err().kind(), "config_error");
        args.message = "hello".into();
        assert!(validate_converse(&args).is_ok());
    }

    #[test]
    fn listen_duration_ranges_are_enforced() {
        let mut args = ConverseArgs::default();
        args.listen_duration_max_s = 0.5;
        assert!(validate_converse(&args).is_err());
        args.listen_duration_max_s = 301.0;
        assert!(validate_converse(&args).is_err());
        args.listen_duration_max_s = 30.0;
        args.listen_duration_min_s = 31.0;
        assert!(validate_converse(&args).is_err());
        args.listen_duration_min_s = 5.0;
        assert!(validate_converse(&args).is_ok());
    }

    #[test]
    fn speed_and_aggressiveness_ranges() {
        let mut args = ConverseArgs::default();
        args.speed = 0.1;
        assert!(validate_converse(&args).is_err());
        args.speed = 4.5;
        assert!(validate_converse(&args).is_err());
        args.speed = 1.5;
        args.vad_aggressiveness = Some(4);
        assert!(validate_converse(&args).is_err());
        args.vad_aggressiveness = Some(3);
        assert!(validate_converse(&args).is_ok());
    }

    #[test]
    fn transport_parsing() {
        assert_eq!(Transport::parse("auto").unwrap(), Transport::Auto);
        assert_eq!(Transport::parse("local").unwrap(), Transport::Local);
        assert_eq!(Transport::parse("room").unwrap(), Transport::Room);
        assert!(Transport::parse("carrier-pigeon").is_err());
    }

    #[tokio::test]
    async fn room_transport_is_refused_before_touching_devices() {
        let mut env = std::collections::HashMap::new();
        let dir = tempfile::tempdir().unwrap();
        env.insert(
            "VOICEMODE_BASE_DIR".to_string(),
            dir.path().to_string_lossy().to_string(),
        );
        let engine = Engine::new(Settings::load_with(&env).unwrap()).unwrap();
        let args = ConverseArgs {
            message: "hello".into(),
            transport: Transport::Room,
            ..Default::default()
        };
        let err = engine
            .converse(args, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no_suitable_endpoint");
        engine.shutdown().await;
    }
}
