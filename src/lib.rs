//! VoiceMode — voice-interaction middleware for MCP clients.
//!
//! One `converse` tool call holds a full voice turn: stream synthesized
//! speech to the speaker, record the human reply with voice-activity
//! end-of-turn detection, upload it for transcription, and return the
//! text. Endpoints are OpenAI-compatible HTTP services tracked by a
//! health-aware registry with deterministic failover.

pub mod audio;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod providers;
pub mod services;
pub mod stt;
pub mod tts;
pub mod vad;

pub use config::Settings;
pub use engine::Engine;
pub use error::{Result, VoiceError};
