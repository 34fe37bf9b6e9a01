//! Ordered, health-aware endpoint registry.
//!
//! The registry orders endpoints and caches liveness; the turn engine owns
//! retry. When the engine reports a failure the endpoint is skipped until
//! the probe window elapses. Endpoints that were never probed are eligible
//! (optimistic).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, warn};

use super::{Endpoint, ProviderKind, ProviderType};
use crate::config::Settings;
use crate::error::{Result, VoiceError};

#[derive(Debug, Clone, Copy)]
struct ProbeResult {
    ok: bool,
    at: Instant,
}

/// Selection result for the synthesis path.
#[derive(Debug, Clone)]
pub struct TtsSelection {
    pub endpoint: Endpoint,
    pub voice: String,
    pub model: String,
}

/// Selection result for the transcription path.
#[derive(Debug, Clone)]
pub struct SttSelection {
    pub endpoint: Endpoint,
    pub model: String,
}

pub struct Registry {
    tts: Vec<Endpoint>,
    stt: Vec<Endpoint>,
    voice_prefs: Vec<String>,
    model_prefs: Vec<String>,
    liveness: RwLock<HashMap<(ProviderKind, String), ProbeResult>>,
    client: Client,
    probe_timeout: Duration,
    probe_window: Duration,
}

impl Registry {
    pub fn from_settings(settings: &Settings, client: Client) -> Self {
        let tts = settings
            .tts_base_urls
            .iter()
            .map(|u| Endpoint::new(u.clone(), ProviderKind::Tts))
            .collect();
        let stt = settings
            .stt_base_urls
            .iter()
            .map(|u| Endpoint::new(u.clone(), ProviderKind::Stt))
            .collect();
        Self {
            tts,
            stt,
            voice_prefs: settings.tts_voices.clone(),
            model_prefs: settings.tts_models.clone(),
            liveness: RwLock::new(HashMap::new()),
            client,
            probe_timeout: Duration::from_secs(settings.probe_timeout_s),
            probe_window: Duration::from_secs(settings.probe_window_s),
        }
    }

    fn all(&self, kind: ProviderKind) -> &[Endpoint] {
        match kind {
            ProviderKind::Tts => &self.tts,
            ProviderKind::Stt => &self.stt,
        }
    }

    /// Endpoints in configuration order, skipping those that failed within
    /// the probe window.
    pub fn eligible(&self, kind: ProviderKind) -> Vec<Endpoint> {
        let liveness = self.liveness.read().unwrap();
        self.all(kind)
            .iter()
            .filter(|e| {
                match liveness.get(&(kind, e.base_url.clone())) {
                    Some(probe) if !probe.ok => probe.at.elapsed() >= self.probe_window,
                    _ => true,
                }
            })
            .cloned()
            .collect()
    }

    /// Every configured endpoint with its cached liveness, for status
    /// reporting. `None` means never probed.
    pub fn endpoints_with_liveness(&self, kind: ProviderKind) -> Vec<(Endpoint, Option<bool>)> {
        let liveness = self.liveness.read().unwrap();
        self.all(kind)
            .iter()
            .map(|e| {
                let cached = liveness
                    .get(&(kind, e.base_url.clone()))
                    .map(|p| p.ok);
                (e.clone(), cached)
            })
            .collect()
    }

    /// Probe one endpoint's health path and cache the result.
    pub async fn probe(&self, endpoint: &Endpoint) -> bool {
        let url = endpoint.probe_url();
        let ok = match self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(endpoint = %endpoint.base_url, "Probe failed: {}", e);
                false
            }
        };
        self.record(endpoint, ok);
        ok
    }

    /// Engine-reported failure: skip this endpoint until the window elapses.
    pub fn mark_failed(&self, endpoint: &Endpoint) {
        warn!(endpoint = %endpoint.base_url, kind = %endpoint.kind, "Marking endpoint unhealthy");
        self.record(endpoint, false);
    }

    /// Engine-reported success keeps the liveness cache warm.
    pub fn mark_ok(&self, endpoint: &Endpoint) {
        self.record(endpoint, true);
    }

    fn record(&self, endpoint: &Endpoint, ok: bool) {
        let mut liveness = self.liveness.write().unwrap();
        liveness.insert(
            (endpoint.kind, endpoint.base_url.clone()),
            ProbeResult {
                ok,
                at: Instant::now(),
            },
        );
    }

    /// Pick the first eligible TTS endpoint that can serve the requested
    /// voice/model, resolving both by preference-list order.
    pub fn select_for_tts(
        &self,
        requested_voice: Option<&str>,
        requested_model: Option<&str>,
        requires_emotion: bool,
    ) -> Result<TtsSelection> {
        let eligible = self.eligible(ProviderKind::Tts);
        if eligible.is_empty() {
            return Err(VoiceError::NoSuitableEndpoint(
                "all TTS endpoints are marked unhealthy".into(),
            ));
        }

        for endpoint in eligible {
            let Some(voice) = pick(
                requested_voice,
                &self.voice_prefs,
                endpoint.provider_type.supported_voices(),
            ) else {
                continue;
            };
            let model = if requires_emotion {
                match pick_emotion_model(requested_model, endpoint.provider_type) {
                    Some(m) => m,
                    None => continue,
                }
            } else {
                match pick(
                    requested_model,
                    &self.model_prefs,
                    endpoint.provider_type.supported_tts_models(),
                ) {
                    Some(m) => m,
                    None => continue,
                }
            };
            return Ok(TtsSelection {
                endpoint,
                voice,
                model,
            });
        }

        Err(VoiceError::NoSuitableEndpoint(format!(
            "no TTS endpoint serves voice={} model={} emotion={}",
            requested_voice.unwrap_or("<any>"),
            requested_model.unwrap_or("<any>"),
            requires_emotion,
        )))
    }

    /// Pick the first eligible STT endpoint and a model it serves.
    pub fn select_for_stt(&self, requested_model: Option<&str>) -> Result<SttSelection> {
        let eligible = self.eligible(ProviderKind::Stt);
        if eligible.is_empty() {
            return Err(VoiceError::NoSuitableEndpoint(
                "all STT endpoints are marked unhealthy".into(),
            ));
        }

        const STT_MODEL_PREFS: &[&str] = &["whisper-1", "gpt-4o-mini-transcribe"];

        for endpoint in eligible {
            let prefs: Vec<String> = STT_MODEL_PREFS.iter().map(|s| s.to_string()).collect();
            let Some(model) = pick(
                requested_model,
                &prefs,
                endpoint.provider_type.supported_stt_models(),
            ) else {
                continue;
            };
            return Ok(SttSelection { endpoint, model });
        }

        Err(VoiceError::NoSuitableEndpoint(format!(
            "no STT endpoint serves model={}",
            requested_model.unwrap_or("<any>"),
        )))
    }
}

/// Resolve a requested value against an endpoint's supported set, falling
/// back through the preference list. `supported = None` means the endpoint
/// accepts anything.
fn pick(
    requested: Option<&str>,
    prefs: &[String],
    supported: Option<&'static [&'static str]>,
) -> Option<String> {
    match supported {
        None => requested
            .map(str::to_string)
            .or_else(|| prefs.first().cloned()),
        Some(supported) => {
            if let Some(req) = requested {
                // An explicit request must be honored exactly or the
                // endpoint is skipped.
                return supported.contains(&req).then(|| req.to_string());
            }
            // No request: the preference list must intersect the supported
            // set, otherwise this endpoint lacks a matching value.
            prefs
                .iter()
                .find(|p| supported.contains(&p.as_str()))
                .cloned()
        }
    }
}

fn pick_emotion_model(requested: Option<&str>, provider: ProviderType) -> Option<String> {
    let capable = provider.emotion_capable_models();
    match requested {
        Some(req) => capable.contains(&req).then(|| req.to_string()),
        None => capable.first().map(|m| m.to_string()),
    }
}
