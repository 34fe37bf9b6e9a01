//! Directory layout rooted at the configured base directory.
//!
//! ```text
//! <base_dir>/
//!   audio/             saved synthesis/recording artifacts
//!   transcriptions/    saved transcripts
//!   logs/              voicemode.log + service logs
//!   logs/events/       <YYYY-MM-DD>.jsonl structured events
//!   logs/exchanges/    <YYYY-MM-DD>.jsonl one line per converse call
//!   run/               pidfiles for supervised services
//! ```

use std::path::{Path, PathBuf};

/// Default base directory: `~/.voicemode`.
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voicemode")
}

/// Derived paths under the base directory.
#[derive(Debug, Clone)]
pub struct Paths {
    base: PathBuf,
}

impl Paths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.base.join("audio")
    }

    pub fn transcriptions_dir(&self) -> PathBuf {
        self.base.join("transcriptions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.logs_dir().join("events")
    }

    pub fn exchanges_dir(&self) -> PathBuf {
        self.logs_dir().join("exchanges")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.base.join("run")
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("voicemode.json")
    }

    pub fn service_log(&self, name: &str) -> PathBuf {
        self.logs_dir().join(format!("{name}.log"))
    }

    pub fn pidfile(&self, name: &str) -> PathBuf {
        self.run_dir().join(format!("{name}.pid"))
    }

    /// Artifact file name: `<timestamp>_<conversation>[_tag].<ext>`.
    pub fn artifact_name(conversation_id: &str, tag: Option<&str>, ext: &str) -> String {
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
        match tag {
            Some(tag) => format!("{ts}_{conversation_id}_{tag}.{ext}"),
            None => format!("{ts}_{conversation_id}.{ext}"),
        }
    }

    /// Create every directory the process writes into.
    pub fn ensure_all(&self) -> std::io::Result<()> {
        for dir in [
            self.audio_dir(),
            self.transcriptions_dir(),
            self.events_dir(),
            self.exchanges_dir(),
            self.run_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_at_base() {
        let p = Paths::new("/tmp/vm-test");
        assert_eq!(p.events_dir(), PathBuf::from("/tmp/vm-test/logs/events"));
        assert_eq!(p.pidfile("kokoro"), PathBuf::from("/tmp/vm-test/run/kokoro.pid"));
        assert_eq!(p.service_log("whisper"), PathBuf::from("/tmp/vm-test/logs/whisper.log"));
    }
}
