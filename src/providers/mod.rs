//! Endpoint metadata and the health-aware provider registry.

pub mod registry;

pub use registry::Registry;

use serde::Serialize;

/// Which service an endpoint provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Tts,
    Stt,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tts => write!(f, "tts"),
            Self::Stt => write!(f, "stt"),
        }
    }
}

/// Closed set of provider flavors. Drives health paths, format tables and
/// voice/model capabilities; replaces string-matching on URLs at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAi,
    Kokoro,
    Whisper,
    LiveKit,
    Unknown,
}

impl ProviderType {
    /// Classify a base URL. Local conventions: kokoro serves on 8880,
    /// whisper on 2022.
    pub fn infer(base_url: &str) -> Self {
        let url = base_url.to_ascii_lowercase();
        if url.contains("openai.com") {
            Self::OpenAi
        } else if url.contains("kokoro") || url.contains(":8880") {
            Self::Kokoro
        } else if url.contains("whisper") || url.contains(":2022") {
            Self::Whisper
        } else if url.contains("livekit") {
            Self::LiveKit
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Kokoro => "kokoro",
            Self::Whisper => "whisper",
            Self::LiveKit => "livekit",
            Self::Unknown => "unknown",
        }
    }

    /// Voices this provider flavor is known to serve, best-documented first.
    /// `None` means "accept whatever the caller asks for".
    pub fn supported_voices(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::OpenAi => Some(&[
                "alloy", "echo", "fable", "onyx", "nova", "shimmer", "coral", "sage",
            ]),
            Self::Kokoro => Some(&[
                "af_sky", "af_bella", "af_nicole", "af_sarah", "am_adam", "am_michael",
            ]),
            Self::Whisper | Self::LiveKit | Self::Unknown => None,
        }
    }

    /// TTS models served by this flavor.
    pub fn supported_tts_models(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::OpenAi => Some(&["tts-1", "tts-1-hd", "gpt-4o-mini-tts"]),
            Self::Kokoro => Some(&["tts-1"]),
            Self::Whisper | Self::LiveKit | Self::Unknown => None,
        }
    }

    /// STT models served by this flavor.
    pub fn supported_stt_models(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::OpenAi => Some(&["whisper-1", "gpt-4o-mini-transcribe", "gpt-4o-transcribe"]),
            Self::Whisper => Some(&["whisper-1"]),
            Self::Kokoro | Self::LiveKit | Self::Unknown => None,
        }
    }

    /// Models that honor the `instructions` field (emotional delivery).
    pub fn emotion_capable_models(&self) -> &'static [&'static str] {
        match self {
            Self::OpenAi => &["gpt-4o-mini-tts"],
            _ => &[],
        }
    }
}

/// One configured endpoint. Unique per (kind, base_url).
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    pub kind: ProviderKind,
    pub provider_type: ProviderType,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>, kind: ProviderKind) -> Self {
        let base_url = base_url.into();
        let provider_type = ProviderType::infer(&base_url);
        Self {
            base_url,
            kind,
            provider_type,
        }
    }

    /// URL used for the liveness probe: `/models` under the base for cloud
    /// providers, `/health` at the server root for local services.
    pub fn probe_url(&self) -> String {
        match self.provider_type {
            ProviderType::OpenAi => format!("{}/models", self.base_url),
            _ => {
                let root = self
                    .base_url
                    .strip_suffix("/v1")
                    .unwrap_or(&self.base_url);
                format!("{root}/health")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_type_inference() {
        assert_eq!(ProviderType::infer("https://api.openai.com/v1"), ProviderType::OpenAi);
        assert_eq!(ProviderType::infer("http://127.0.0.1:8880/v1"), ProviderType::Kokoro);
        assert_eq!(ProviderType::infer("http://127.0.0.1:2022/v1"), ProviderType::Whisper);
        assert_eq!(ProviderType::infer("http://10.0.0.5:9999/v1"), ProviderType::Unknown);
    }

    #[test]
    fn probe_urls_differ_by_flavor() {
        let cloud = Endpoint::new("https://api.openai.com/v1", ProviderKind::Tts);
        assert_eq!(cloud.probe_url(), "https://api.openai.com/v1/models");

        let local = Endpoint::new("http://127.0.0.1:8880/v1", ProviderKind::Tts);
        assert_eq!(local.probe_url(), "http://127.0.0.1:8880/health");
    }
}
