//! VoiceMode MCP server entry point.

use anyhow::Context;
use rmcp::ServiceExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voicemode::engine::Engine;
use voicemode::mcp::VoiceModeService;
use voicemode::Settings;

/// Route tracing away from stdout, which carries the MCP transport: into
/// `logs/voicemode.log` when the base directory is writable, to stderr
/// otherwise. The returned guard flushes the file writer on drop and must
/// live until exit.
fn init_tracing(settings: &Settings) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if settings.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false);

    let logs_dir = settings.paths().logs_dir();
    match std::fs::create_dir_all(&logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(logs_dir, "voicemode.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            builder.with_writer(writer).init();
            Some(guard)
        }
        Err(e) => {
            builder.with_writer(std::io::stderr).init();
            tracing::warn!("Log directory unavailable ({}), tracing to stderr", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    let _guard = init_tracing(&settings);

    info!(base_dir = %settings.base_dir.display(), "VoiceMode starting");

    let engine = Engine::new(settings).context("failed to initialize engine")?;
    let service = VoiceModeService::new(engine.clone());

    let running = service
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await
        .context("failed to start MCP server")?;

    info!("MCP server running, waiting for client requests");
    running.waiting().await?;

    info!("MCP client disconnected, shutting down");
    engine.shutdown().await;

    Ok(())
}
