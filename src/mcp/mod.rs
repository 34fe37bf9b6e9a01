//! MCP server handler binding the tool surface to the engine.
//!
//! Thin by design: argument coercion, default application and response
//! shaping only. Domain failures become tagged error results; the handler
//! never surfaces them as transport-level errors.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ErrorData as McpError;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::audio;
use crate::codec::AudioFormat;
use crate::engine::{ConverseArgs, ConverseResult, Engine, ListenArgs, Transport};
use crate::error::VoiceError;

/// MCP service wrapping the engine. Cheap to clone.
#[derive(Clone)]
pub struct VoiceModeService {
    engine: Arc<Engine>,
}

#[derive(Debug, Deserialize)]
struct ConverseToolArgs {
    #[serde(default)]
    message: String,
    #[serde(default = "default_true")]
    wait_for_response: bool,
    #[serde(default)]
    listen_duration_min: f64,
    /// Falls back to the configured max listen duration.
    #[serde(default)]
    listen_duration_max: Option<f64>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    audio_format: Option<String>,
    #[serde(default = "default_speed")]
    speed: f64,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    disable_vad: bool,
    #[serde(default)]
    vad_aggressiveness: Option<u8>,
    #[serde(default = "default_true")]
    chime_enabled: bool,
    #[serde(default)]
    skip_tts: bool,
    #[serde(default = "default_transport")]
    transport: String,
}

#[derive(Debug, Deserialize)]
struct ListenToolArgs {
    #[serde(default)]
    listen_duration_min: f64,
    #[serde(default)]
    listen_duration_max: Option<f64>,
    #[serde(default)]
    disable_vad: bool,
    #[serde(default)]
    vad_aggressiveness: Option<u8>,
    #[serde(default = "default_true")]
    chime_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RecentStatsArgs {
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_speed() -> f64 {
    1.0
}

fn default_transport() -> String {
    "auto".into()
}

fn default_recent_limit() -> usize {
    10
}

impl VoiceModeService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    fn parse_args<T: serde::de::DeserializeOwned>(
        arguments: Option<JsonObject>,
    ) -> Result<T, McpError> {
        let value = serde_json::Value::Object(arguments.unwrap_or_default());
        serde_json::from_value(value)
            .map_err(|e| McpError::invalid_params(format!("invalid arguments: {e}"), None))
    }

    async fn converse_impl(
        &self,
        arguments: Option<JsonObject>,
        context: &RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args: ConverseToolArgs = Self::parse_args(arguments)?;
        let audio_format = match args.audio_format.as_deref() {
            Some(raw) => Some(raw.parse::<AudioFormat>().map_err(|_| {
                McpError::invalid_params(format!("unknown audio_format {raw:?}"), None)
            })?),
            None => None,
        };
        let transport = Transport::parse(&args.transport)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;

        let engine_args = ConverseArgs {
            message: args.message,
            wait_for_response: args.wait_for_response,
            listen_duration_min_s: args.listen_duration_min,
            listen_duration_max_s: args
                .listen_duration_max
                .unwrap_or(self.engine.settings.max_listen_duration_s),
            voice: args.voice,
            model: args.model,
            audio_format,
            speed: args.speed,
            instructions: args.instructions,
            disable_vad: args.disable_vad,
            vad_aggressiveness: args.vad_aggressiveness,
            chime_enabled: args.chime_enabled,
            skip_tts: args.skip_tts,
            transport,
        };

        match self.engine.converse(engine_args, context.ct.clone()).await {
            Ok(result) => Ok(converse_result(result)),
            Err(VoiceError::Config(msg)) => Err(McpError::invalid_params(msg, None)),
            Err(e) => Ok(error_result(&e)),
        }
    }

    async fn listen_impl(
        &self,
        arguments: Option<JsonObject>,
        context: &RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args: ListenToolArgs = Self::parse_args(arguments)?;
        let engine_args = ListenArgs {
            listen_duration_min_s: args.listen_duration_min,
            listen_duration_max_s: args
                .listen_duration_max
                .unwrap_or(self.engine.settings.max_listen_duration_s),
            disable_vad: args.disable_vad,
            vad_aggressiveness: args.vad_aggressiveness,
            chime_enabled: args.chime_enabled,
        };
        match self.engine.listen(engine_args, context.ct.clone()).await {
            Ok(result) => Ok(converse_result(result)),
            Err(VoiceError::Config(msg)) => Err(McpError::invalid_params(msg, None)),
            Err(e) => Ok(error_result(&e)),
        }
    }

    async fn status_impl(&self) -> CallToolResult {
        use crate::providers::ProviderKind;

        // Opportunistic refresh: probe anything never probed before.
        for kind in [ProviderKind::Tts, ProviderKind::Stt] {
            for (endpoint, cached) in self.engine.registry().endpoints_with_liveness(kind) {
                if cached.is_none() {
                    self.engine.registry().probe(&endpoint).await;
                }
            }
        }

        let endpoint_view = |kind: ProviderKind| -> Vec<serde_json::Value> {
            self.engine
                .registry()
                .endpoints_with_liveness(kind)
                .into_iter()
                .map(|(e, alive)| {
                    json!({
                        "base_url": e.base_url,
                        "provider": e.provider_type.as_str(),
                        "healthy": alive,
                    })
                })
                .collect()
        };

        let services = self.engine.supervisor().status_all().await;
        let structured = json!({
            "conversation_id": self.engine.logger().conversation_id(),
            "tts_endpoints": endpoint_view(ProviderKind::Tts),
            "stt_endpoints": endpoint_view(ProviderKind::Stt),
            "services": services,
        });
        structured_result(structured, "voice status")
    }

    fn devices_impl(&self) -> CallToolResult {
        let structured = json!({
            "input": audio::list_input_devices(),
            "output": audio::list_output_devices(),
        });
        structured_result(structured, "audio devices")
    }

    fn statistics_impl(&self) -> CallToolResult {
        let summary = self.engine.stats().summary();
        let structured = serde_json::to_value(&summary).unwrap_or_default();
        structured_result(structured, "voice statistics")
    }

    fn statistics_recent_impl(
        &self,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        let args: RecentStatsArgs = Self::parse_args(arguments)?;
        let records = self.engine.stats().recent(args.limit.clamp(1, 100));
        let structured = json!({ "exchanges": records });
        Ok(structured_result(structured, "recent exchanges"))
    }
}

fn converse_result(result: ConverseResult) -> CallToolResult {
    let text = match (&result.text, result.outcome.as_str()) {
        (Some(t), _) if !t.is_empty() => t.clone(),
        (_, outcome) => outcome.to_string(),
    };
    let structured = serde_json::to_value(&result).unwrap_or_default();
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    }
}

fn error_result(error: &VoiceError) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(error.to_string())],
        structured_content: Some(json!({"error": error.kind(), "detail": error.to_string()})),
        is_error: Some(true),
        meta: None,
    }
}

fn structured_result(structured: serde_json::Value, label: &str) -> CallToolResult {
    let text = serde_json::to_string_pretty(&structured).unwrap_or_else(|_| label.to_string());
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    }
}

fn tool(name: &'static str, description: &'static str, schema: serde_json::Value) -> Tool {
    let schema: JsonObject =
        serde_json::from_value(schema).expect("tool schema should deserialize");
    Tool::new(Cow::Borrowed(name), Cow::Borrowed(description), Arc::new(schema))
}

fn converse_tool() -> Tool {
    tool(
        "converse",
        "Speak a message aloud through text-to-speech, then listen for the \
         spoken reply and return its transcript. The one call that holds a \
         full voice turn.",
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text to speak. May be empty when wait_for_response is true."
                },
                "wait_for_response": {
                    "type": "boolean", "default": true,
                    "description": "Record and transcribe the reply after speaking."
                },
                "listen_duration_min": {
                    "type": "number", "minimum": 0, "default": 0,
                    "description": "Minimum reply length in seconds before silence can end the turn."
                },
                "listen_duration_max": {
                    "type": "number", "minimum": 1, "maximum": 300, "default": 120,
                    "description": "Hard cap on the reply recording, in seconds."
                },
                "voice": { "type": "string", "description": "Voice name (e.g. af_sky, alloy)." },
                "model": { "type": "string", "description": "TTS model (e.g. tts-1, gpt-4o-mini-tts)." },
                "audio_format": {
                    "type": "string", "enum": ["pcm", "wav", "mp3", "opus", "flac", "aac"],
                    "description": "Preferred synthesis format; substituted when the endpoint lacks it."
                },
                "speed": {
                    "type": "number", "minimum": 0.25, "maximum": 4.0, "default": 1.0,
                    "description": "Playback speed multiplier."
                },
                "instructions": {
                    "type": "string",
                    "description": "Emotional delivery hints; honored only when emotions are enabled."
                },
                "disable_vad": {
                    "type": "boolean", "default": false,
                    "description": "Record a fixed window instead of detecting end-of-turn."
                },
                "vad_aggressiveness": {
                    "type": "integer", "minimum": 0, "maximum": 3,
                    "description": "Voice activity detection aggressiveness override."
                },
                "chime_enabled": {
                    "type": "boolean", "default": true,
                    "description": "Play start/stop tones around the recording."
                },
                "skip_tts": {
                    "type": "boolean", "default": false,
                    "description": "Skip synthesis and go straight to listening."
                },
                "transport": {
                    "type": "string", "enum": ["auto", "local", "room"], "default": "auto",
                    "description": "Audio transport selection."
                }
            }
        }),
    )
}

fn listen_tool() -> Tool {
    tool(
        "listen_for_speech",
        "Record from the microphone with voice-activity end-of-turn \
         detection and return the transcript, without speaking first.",
        json!({
            "type": "object",
            "properties": {
                "listen_duration_min": { "type": "number", "minimum": 0, "default": 0 },
                "listen_duration_max": { "type": "number", "minimum": 1, "maximum": 300, "default": 120 },
                "disable_vad": { "type": "boolean", "default": false },
                "vad_aggressiveness": { "type": "integer", "minimum": 0, "maximum": 3 },
                "chime_enabled": { "type": "boolean", "default": true }
            }
        }),
    )
}

fn status_tool() -> Tool {
    tool(
        "voice_status",
        "Report configured TTS/STT endpoints with their health, supervised \
         local services, and the active conversation id.",
        json!({ "type": "object", "properties": {} }),
    )
}

fn devices_tool() -> Tool {
    tool(
        "check_audio_devices",
        "List audio input and output devices, marking the system defaults.",
        json!({ "type": "object", "properties": {} }),
    )
}

fn statistics_tool() -> Tool {
    tool(
        "voice_statistics",
        "Aggregate metrics over the recent exchange window: counts, mean \
         time-to-first-audio, mean transcription latency.",
        json!({ "type": "object", "properties": {} }),
    )
}

fn statistics_recent_tool() -> Tool {
    tool(
        "voice_statistics_recent",
        "The most recent exchange records with per-leg metrics.",
        json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer", "minimum": 1, "maximum": 100, "default": 10,
                    "description": "How many records to return."
                }
            }
        }),
    )
}

impl ServerHandler for VoiceModeService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Voice interaction for AI assistants: converse speaks a message \
                 and returns the human's spoken reply as text. Use voice_status \
                 to check endpoint health and check_audio_devices to debug \
                 missing hardware."
                    .into(),
            ),
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _pagination: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: vec![
                converse_tool(),
                listen_tool(),
                status_tool(),
                devices_tool(),
                statistics_tool(),
                statistics_recent_tool(),
            ],
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        info!(tool = %request.name, "MCP tool call");
        match request.name.as_ref() {
            "converse" => self.converse_impl(request.arguments, &context).await,
            "listen_for_speech" => self.listen_impl(request.arguments, &context).await,
            "voice_status" => Ok(self.status_impl().await),
            "check_audio_devices" => Ok(self.devices_impl()),
            "voice_statistics" => Ok(self.statistics_impl()),
            "voice_statistics_recent" => self.statistics_recent_impl(request.arguments),
            other => Err(McpError::invalid_request(
                format!("unknown tool: {other}"),
                None,
            )),
        }
    }
}
