//! Error taxonomy for the voice engine.
//!
//! Per-endpoint failures (`TtsFailed`, `SttFailed`) are recoverable by
//! failover; the turn engine is the only place that converts them into an
//! aggregated error once every endpoint has been tried.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoiceError>;

#[derive(Debug, Error)]
pub enum VoiceError {
    /// Malformed settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device missing or unusable. Fatal for the turn.
    #[error("audio device error: {0}")]
    Device(String),

    /// A turn is already in progress. The caller may retry.
    #[error("a voice turn is already in progress")]
    Busy,

    /// No endpoint supports the requested voice/model/features.
    #[error("no suitable endpoint: {0}")]
    NoSuitableEndpoint(String),

    /// A single TTS endpoint failed; the engine fails over to the next.
    #[error("tts failed on {endpoint}: {reason}")]
    TtsFailed { endpoint: String, reason: String },

    /// A single STT endpoint failed; the engine fails over to the next.
    #[error("stt failed on {endpoint}: {reason}")]
    SttFailed { endpoint: String, reason: String },

    /// Cooperative cancellation; partial metrics are still returned.
    #[error("operation cancelled")]
    Cancelled,

    /// A deadline elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Encode/decode failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// Invariant violation; surfaced generically, logged in full.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VoiceError {
    /// Stable machine-readable tag used in tool results and log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Device(_) => "device_error",
            Self::Busy => "busy",
            Self::NoSuitableEndpoint(_) => "no_suitable_endpoint",
            Self::TtsFailed { .. } => "tts_failed",
            Self::SttFailed { .. } => "stt_failed",
            Self::Cancelled => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::Codec(_) => "codec_error",
            Self::Internal(_) => "internal_error",
        }
    }
}
