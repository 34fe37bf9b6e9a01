//! Streaming text-to-speech over OpenAI-compatible endpoints.
//!
//! `POST {base_url}/audio/speech` with a JSON body; the response body is a
//! byte stream in the negotiated format. A reader task feeds a bounded
//! channel (blocking sends are the backpressure), the speak loop buffers a
//! small prefix for clean start-up, then pipes audio to the speaker while
//! the rest of the body is still arriving. PCM and WAV play progressively;
//! compressed bodies are decoded once complete.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::playback::AudioPlayer;
use crate::audio::AudioBuffer;
use crate::codec::{self, AudioFormat};
use crate::config::paths::Paths;
use crate::config::Settings;
use crate::error::{Result, VoiceError};
use crate::providers::{Endpoint, ProviderKind, ProviderType};

/// One synthesis request, fully resolved by the engine.
#[derive(Debug, Clone)]
pub struct SpeakRequest {
    pub text: String,
    pub voice: String,
    pub model: String,
    pub format: AudioFormat,
    pub speed: f32,
    pub instructions: Option<String>,
}

/// Result of one speak call.
#[derive(Debug, Clone, Default)]
pub struct TtsOutcome {
    pub ttfa_ms: Option<u64>,
    pub generation_ms: u64,
    pub playback_ms: u64,
    pub bytes: u64,
    pub audio_path: Option<PathBuf>,
    pub cancelled: bool,
}

pub struct TtsStreamer {
    client: Client,
    settings: Arc<Settings>,
}

impl TtsStreamer {
    pub fn new(client: Client, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    /// Negotiate the wire format for an endpoint, logging substitutions.
    /// `requested` overrides the configured per-direction format.
    pub fn negotiate_format(&self, endpoint: &Endpoint, requested: Option<AudioFormat>) -> AudioFormat {
        let requested = requested.unwrap_or(self.settings.tts_audio_format);
        let supported =
            codec::provider_supported_formats(endpoint.provider_type, ProviderKind::Tts);
        let chosen = codec::negotiate(requested, supported, Some(AudioFormat::decodable));
        if chosen != requested {
            warn!(
                requested = %requested,
                substituted = %chosen,
                endpoint = %endpoint.base_url,
                "TTS format not usable with this endpoint, substituting"
            );
        }
        chosen
    }

    /// Open the streaming synthesis request and hand back a bounded chunk
    /// channel plus the reader task. Split out from [`speak`] so the HTTP
    /// path is testable without an audio device.
    pub async fn open_stream(
        &self,
        endpoint: &Endpoint,
        request: &SpeakRequest,
    ) -> Result<(mpsc::Receiver<Bytes>, JoinHandle<()>)> {
        let mut body = serde_json::json!({
            "model": request.model,
            "input": request.text,
            "voice": request.voice,
            "response_format": request.format.as_str(),
            "speed": request.speed,
        });
        if let Some(instructions) = &request.instructions {
            body["instructions"] = serde_json::Value::String(instructions.clone());
        }

        let url = format!("{}/audio/speech", endpoint.base_url);
        let mut req = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(self.settings.generation_timeout_s));
        if endpoint.provider_type == ProviderType::OpenAi {
            if let Some(key) = &self.settings.openai_api_key {
                req = req.bearer_auth(key);
            }
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                VoiceError::Timeout(format!("tts generation on {}", endpoint.base_url))
            } else {
                VoiceError::TtsFailed {
                    endpoint: endpoint.base_url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(VoiceError::TtsFailed {
                endpoint: endpoint.base_url.clone(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        // Bounded by the max buffer duration: a slow speaker backpressures
        // the reader through blocking sends.
        let capacity = ((self.settings.stream_max_buffer_s * 1000.0)
            / self.settings.stream_buffer_ms as f64)
            .ceil()
            .max(1.0) as usize;
        let (tx, rx) = mpsc::channel::<Bytes>(capacity);

        let mut stream = resp.bytes_stream();
        let endpoint_url = endpoint.base_url.clone();
        let reader = tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if tx.send(bytes).await.is_err() {
                            // Receiver gone: cancelled or failed downstream.
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(endpoint = %endpoint_url, "TTS body stream ended: {}", e);
                        break;
                    }
                }
            }
        });

        Ok((rx, reader))
    }

    /// Speak a request through `player`, measuring time-to-first-audio.
    pub async fn speak(
        &self,
        endpoint: &Endpoint,
        request: &SpeakRequest,
        player: &AudioPlayer,
        conversation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TtsOutcome> {
        let started = Instant::now();
        info!(
            endpoint = %endpoint.base_url,
            voice = %request.voice,
            model = %request.model,
            format = %request.format,
            text_len = request.text.len(),
            "TTS request"
        );

        let (mut rx, reader) = self.open_stream(endpoint, request).await?;

        let mut tee = self.open_tee(conversation_id, request.format);
        let mut pending: Vec<u8> = Vec::new();
        let mut compressed: Vec<u8> = Vec::new();
        let mut total_bytes: u64 = 0;
        let mut ttfa: Option<Instant> = None;
        let mut wav_rate: Option<u32> = None;
        let mut started_playback = false;
        // With streaming disabled the whole body is downloaded and decoded
        // in one shot; TTFA then measures the moment playback actually
        // starts.
        let progressive = self.settings.streaming_enabled
            && matches!(request.format, AudioFormat::Pcm | AudioFormat::Wav);
        let generation_deadline =
            started + Duration::from_secs(self.settings.generation_timeout_s);

        let prefix_bytes = self.initial_buffer_bytes();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    player.stop();
                    reader.abort();
                    info!("TTS cancelled mid-stream");
                    return Ok(TtsOutcome {
                        ttfa_ms: ttfa.map(|t| (t - started).as_millis() as u64),
                        generation_ms: started.elapsed().as_millis() as u64,
                        playback_ms: 0,
                        bytes: total_bytes,
                        audio_path: tee.take().map(|t| t.path),
                        cancelled: true,
                    });
                }
                chunk = rx.recv() => chunk,
            };

            let Some(chunk) = chunk else {
                break; // body complete
            };

            if Instant::now() > generation_deadline {
                reader.abort();
                return Err(VoiceError::Timeout(format!(
                    "tts generation on {}",
                    endpoint.base_url
                )));
            }

            total_bytes += chunk.len() as u64;
            if let Some(t) = tee.as_mut() {
                t.write(&chunk);
            }

            if !progressive {
                compressed.extend_from_slice(&chunk);
                continue;
            }

            pending.extend_from_slice(&chunk);

            // WAV: consume the canonical 44-byte header once.
            if request.format == AudioFormat::Wav && wav_rate.is_none() {
                if pending.len() < 44 {
                    continue;
                }
                let rate = u32::from_le_bytes([pending[24], pending[25], pending[26], pending[27]]);
                wav_rate = Some(if rate > 0 { rate } else { self.settings.sample_rate });
                pending.drain(..44);
            }

            // Hold back a short prefix before the first append so playback
            // does not start and immediately starve.
            if !started_playback
                && pending.len() < prefix_bytes.min(self.settings.stream_chunk_size.max(2))
            {
                continue;
            }

            let rate = wav_rate.unwrap_or(self.settings.sample_rate);
            if self.append_pcm_bytes(player, &mut pending, rate) && ttfa.is_none() {
                ttfa = Some(Instant::now());
            }
            started_playback = true;
        }

        let generation_ms = started.elapsed().as_millis() as u64;

        // Flush the progressive remainder or decode the compressed body.
        if progressive {
            let rate = wav_rate.unwrap_or(self.settings.sample_rate);
            if self.append_pcm_bytes(player, &mut pending, rate) && ttfa.is_none() {
                ttfa = Some(Instant::now());
            }
        } else if !compressed.is_empty() {
            let decoded = codec::decode::decode(&compressed, request.format, self.settings.sample_rate)?;
            if !decoded.is_empty() {
                let first = player.append_pcm(decoded.samples, decoded.sample_rate);
                if first && ttfa.is_none() {
                    ttfa = Some(Instant::now());
                }
            }
        }

        let playback_started = ttfa.unwrap_or_else(Instant::now);
        let drained = player
            .drain(
                Duration::from_secs(self.settings.playback_drain_timeout_s),
                cancel,
            )
            .await;
        if !drained {
            return Err(VoiceError::Timeout("playback drain".into()));
        }

        let outcome = TtsOutcome {
            ttfa_ms: ttfa.map(|t| (t - started).as_millis() as u64),
            generation_ms,
            playback_ms: playback_started.elapsed().as_millis() as u64,
            bytes: total_bytes,
            audio_path: tee.take().map(|t| t.path),
            cancelled: cancel.is_cancelled(),
        };
        info!(
            ttfa_ms = ?outcome.ttfa_ms,
            generation_ms = outcome.generation_ms,
            playback_ms = outcome.playback_ms,
            bytes = outcome.bytes,
            "TTS complete"
        );
        Ok(outcome)
    }

    /// Bytes of PCM that cover `stream_buffer_ms` at the pipeline rate.
    fn initial_buffer_bytes(&self) -> usize {
        (self.settings.stream_buffer_ms as usize * self.settings.sample_rate as usize * 2) / 1000
    }

    /// Convert buffered i16 LE bytes to samples and queue them, keeping an
    /// odd trailing byte for the next round. Returns `true` when this was
    /// the first audible append.
    fn append_pcm_bytes(&self, player: &AudioPlayer, pending: &mut Vec<u8>, rate: u32) -> bool {
        let usable = pending.len() & !1;
        if usable == 0 {
            return false;
        }
        let chunk: Vec<u8> = pending.drain(..usable).collect();
        let buffer = AudioBuffer::from_i16_le(&chunk, rate);
        player.append_pcm(buffer.samples, rate)
    }

    fn open_tee(&self, conversation_id: &str, format: AudioFormat) -> Option<Tee> {
        if !self.settings.save_audio {
            return None;
        }
        let dir = self.settings.paths().audio_dir();
        let path = dir.join(Paths::artifact_name(
            conversation_id,
            Some("tts"),
            format.extension(),
        ));
        match std::fs::File::create(&path) {
            Ok(file) => Some(Tee { file, path }),
            Err(e) => {
                warn!("Cannot save TTS audio to {}: {}", path.display(), e);
                None
            }
        }
    }
}

struct Tee {
    file: std::fs::File,
    path: PathBuf,
}

impl Tee {
    fn write(&mut self, chunk: &[u8]) {
        if let Err(e) = self.file.write_all(chunk) {
            warn!("TTS audio tee write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_buffer_scales_with_rate() {
        let mut env = std::collections::HashMap::new();
        env.insert("VOICEMODE_BASE_DIR".to_string(), "/tmp/vm-tts".to_string());
        let settings = Arc::new(Settings::load_with(&env).unwrap());
        let streamer = TtsStreamer::new(Client::new(), settings);
        // 150 ms at 24 kHz, 16-bit mono.
        assert_eq!(streamer.initial_buffer_bytes(), 7200);
    }
}
