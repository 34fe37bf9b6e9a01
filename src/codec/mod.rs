//! Audio format vocabulary, per-provider format tables and negotiation.
//!
//! Two capability axes matter: what the *provider* accepts on the wire, and
//! what this process can decode (speaker path) or encode (upload path)
//! locally. Negotiation intersects both.

pub mod decode;
pub mod wav;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::providers::{ProviderKind, ProviderType};

/// Wire formats understood by the OpenAI-compatible speech endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Pcm,
    Wav,
    Mp3,
    Opus,
    Flac,
    Aac,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm => "pcm",
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::Aac => "aac",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pcm => "audio/pcm",
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Opus => "audio/ogg",
            Self::Flac => "audio/flac",
            Self::Aac => "audio/aac",
        }
    }

    /// Formats this process can decode for playback. Opus has no local
    /// decoder, so it never wins speaker-path negotiation.
    pub fn decodable(&self) -> bool {
        !matches!(self, Self::Opus)
    }

    /// Formats this process can produce from PCM for upload.
    pub fn encodable(&self) -> bool {
        matches!(self, Self::Pcm | Self::Wav)
    }
}

impl FromStr for AudioFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm" => Ok(Self::Pcm),
            "wav" | "wave" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            "opus" => Ok(Self::Opus),
            "flac" => Ok(Self::Flac),
            "aac" => Ok(Self::Aac),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global preference order used when a requested format is unavailable.
pub const PREFERENCE_ORDER: &[AudioFormat] = &[
    AudioFormat::Pcm,
    AudioFormat::Mp3,
    AudioFormat::Wav,
    AudioFormat::Flac,
    AudioFormat::Aac,
    AudioFormat::Opus,
];

/// Formats a provider flavor accepts per direction.
pub fn provider_supported_formats(
    provider: ProviderType,
    direction: ProviderKind,
) -> &'static [AudioFormat] {
    use AudioFormat::*;
    match (provider, direction) {
        (ProviderType::OpenAi, ProviderKind::Tts) => &[Mp3, Opus, Aac, Flac, Wav, Pcm],
        (ProviderType::OpenAi, ProviderKind::Stt) => &[Wav, Mp3, Opus, Flac],
        (ProviderType::Kokoro, ProviderKind::Tts) => &[Mp3, Wav, Pcm],
        (ProviderType::Whisper, ProviderKind::Stt) => &[Wav, Mp3],
        // Rooms negotiate their own media; the HTTP fallback set is minimal.
        (ProviderType::LiveKit, _) => &[Wav, Mp3],
        _ => &[Mp3, Wav],
    }
}

/// Pick the wire format for one operation.
///
/// `requested` wins when the provider supports it; otherwise the first entry
/// of the preference order the provider accepts; mp3 as the last resort.
/// `locally` filters to what this process can handle for the direction
/// (decode for TTS, encode for STT) — pass `None` to skip the local gate.
pub fn negotiate(
    requested: AudioFormat,
    supported: &[AudioFormat],
    locally: Option<fn(&AudioFormat) -> bool>,
) -> AudioFormat {
    let usable = |f: &AudioFormat| locally.map_or(true, |ok| ok(f));
    if supported.contains(&requested) && usable(&requested) {
        return requested;
    }
    PREFERENCE_ORDER
        .iter()
        .find(|f| supported.contains(f) && usable(f))
        .copied()
        .unwrap_or(AudioFormat::Mp3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        for f in PREFERENCE_ORDER {
            assert_eq!(f.as_str().parse::<AudioFormat>().unwrap(), *f);
        }
        assert!("midi".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn requested_format_wins_when_supported() {
        let supported = provider_supported_formats(ProviderType::OpenAi, ProviderKind::Tts);
        assert_eq!(negotiate(AudioFormat::Flac, supported, None), AudioFormat::Flac);
    }

    #[test]
    fn unsupported_request_falls_back_in_preference_order() {
        let supported = provider_supported_formats(ProviderType::Whisper, ProviderKind::Stt);
        // pcm is not accepted by whisper upload; mp3 is the highest
        // preference entry within the supported set.
        assert_eq!(negotiate(AudioFormat::Pcm, supported, None), AudioFormat::Mp3);
    }

    #[test]
    fn local_gate_excludes_undecodable_formats() {
        let supported = &[AudioFormat::Opus, AudioFormat::Mp3];
        let chosen = negotiate(AudioFormat::Opus, supported, Some(AudioFormat::decodable));
        assert_eq!(chosen, AudioFormat::Mp3);
    }

    #[test]
    fn negotiated_format_is_always_provider_supported() {
        for provider in [ProviderType::OpenAi, ProviderType::Kokoro, ProviderType::Unknown] {
            for direction in [ProviderKind::Tts, ProviderKind::Stt] {
                let supported = provider_supported_formats(provider, direction);
                for requested in PREFERENCE_ORDER {
                    let chosen = negotiate(*requested, supported, None);
                    assert!(
                        supported.contains(&chosen),
                        "{chosen} not supported by {provider:?}/{direction}"
                    );
                }
            }
        }
    }
}
