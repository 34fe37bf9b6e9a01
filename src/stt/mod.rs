//! Speech-to-text upload over OpenAI-compatible endpoints.
//!
//! `POST {base_url}/audio/transcriptions`, multipart with the encoded
//! recording and the model name. Both a bare text body and a `{"text"}`
//! JSON object are accepted as responses.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::multipart;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::audio::AudioBuffer;
use crate::codec::{self, wav, AudioFormat};
use crate::config::paths::Paths;
use crate::config::Settings;
use crate::error::{Result, VoiceError};
use crate::providers::{Endpoint, ProviderKind, ProviderType};

/// Result of one transcription call.
#[derive(Debug, Clone)]
pub struct SttOutcome {
    pub text: String,
    pub latency_ms: u64,
    pub provider: String,
    pub model: String,
    pub audio_format: AudioFormat,
    pub audio_path: Option<PathBuf>,
    pub transcript_path: Option<PathBuf>,
}

pub struct SttUploader {
    client: Client,
    settings: Arc<Settings>,
}

impl SttUploader {
    pub fn new(client: Client, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    /// Negotiate the upload format for an endpoint: provider tables first,
    /// then the local-encoder gate, warning on each substitution.
    pub fn negotiate_format(&self, endpoint: &Endpoint) -> AudioFormat {
        let supported =
            codec::provider_supported_formats(endpoint.provider_type, ProviderKind::Stt);
        let requested = self.settings.stt_audio_format;
        let chosen = codec::negotiate(requested, supported, None);
        if chosen.encodable() {
            if chosen != requested {
                warn!(
                    requested = %requested, substituted = %chosen,
                    endpoint = %endpoint.base_url,
                    "STT format not accepted by this endpoint, substituting"
                );
            }
            return chosen;
        }
        // No local encoder for the provider-preferred format; wav is
        // accepted by every transcription endpoint in practice.
        warn!(
            requested = %chosen, substituted = %AudioFormat::Wav,
            "No local encoder for the negotiated upload format, substituting"
        );
        AudioFormat::Wav
    }

    /// Upload a recording and return its transcript.
    pub async fn transcribe(
        &self,
        endpoint: &Endpoint,
        model: &str,
        format: AudioFormat,
        buffer: &AudioBuffer,
        conversation_id: &str,
    ) -> Result<SttOutcome> {
        let encoded = wav::encode(buffer, format)?;
        let started = Instant::now();
        debug!(
            endpoint = %endpoint.base_url,
            bytes = encoded.len(),
            format = %format,
            "Uploading recording for transcription"
        );

        let audio_path = self.save_audio(&encoded, format, conversation_id);

        let file_name = format!("audio.{}", format.extension());
        let file_part = multipart::Part::bytes(encoded)
            .file_name(file_name)
            .mime_str(format.mime())
            .map_err(|e| VoiceError::Internal(format!("multipart mime: {e}")))?;

        let form = multipart::Form::new()
            .text("model", model.to_string())
            .text("response_format", "text")
            .part("file", file_part);

        let url = format!("{}/audio/transcriptions", endpoint.base_url);
        let mut req = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(Duration::from_secs(self.settings.stt_timeout_s));
        if endpoint.provider_type == ProviderType::OpenAi {
            if let Some(key) = &self.settings.openai_api_key {
                req = req.bearer_auth(key);
            }
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                VoiceError::Timeout(format!("stt upload on {}", endpoint.base_url))
            } else {
                VoiceError::SttFailed {
                    endpoint: endpoint.base_url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoiceError::SttFailed {
                endpoint: endpoint.base_url.clone(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let body = resp.text().await.map_err(|e| VoiceError::SttFailed {
            endpoint: endpoint.base_url.clone(),
            reason: format!("failed to read response body: {e}"),
        })?;
        let text = extract_text(&body);
        let latency_ms = started.elapsed().as_millis() as u64;

        let transcript_path = self.save_transcript(&text, conversation_id);

        info!(
            latency_ms,
            text_len = text.len(),
            provider = endpoint.provider_type.as_str(),
            "Transcription complete"
        );

        Ok(SttOutcome {
            text,
            latency_ms,
            provider: endpoint.provider_type.as_str().to_string(),
            model: model.to_string(),
            audio_format: format,
            audio_path,
            transcript_path,
        })
    }

    fn save_audio(
        &self,
        encoded: &[u8],
        format: AudioFormat,
        conversation_id: &str,
    ) -> Option<PathBuf> {
        if !self.settings.save_audio {
            return None;
        }
        let path = self
            .settings
            .paths()
            .audio_dir()
            .join(Paths::artifact_name(conversation_id, Some("stt"), format.extension()));
        match std::fs::write(&path, encoded) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Cannot save recording to {}: {}", path.display(), e);
                None
            }
        }
    }

    fn save_transcript(&self, text: &str, conversation_id: &str) -> Option<PathBuf> {
        if !self.settings.save_transcriptions || text.is_empty() {
            return None;
        }
        let path = self
            .settings
            .paths()
            .transcriptions_dir()
            .join(Paths::artifact_name(conversation_id, None, "txt"));
        match std::fs::write(&path, text) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Cannot save transcript to {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Accept either a bare text body or `{"text": ...}` JSON; an empty body
/// yields an empty transcript.
fn extract_text(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
                return text.trim().to_string();
            }
        }
    }
    trimmed.to_string()
}
