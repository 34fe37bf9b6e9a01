//! Structured event and exchange logging.
//!
//! Two append-only JSONL streams under `logs/`: one line per event in
//! `events/<date>.jsonl`, one line per converse call in
//! `exchanges/<date>.jsonl`. A single writer task consumes a bounded queue
//! so lines are never interleaved; senders never block and never surface
//! write failures to the turn path.

pub mod stats;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::paths::Paths;

/// Gap of inactivity after which a new conversation id is minted.
pub const CONVERSATION_GAP: Duration = Duration::from_secs(300);

/// Schema tag stamped on every line.
pub const SCHEMA_VERSION: u32 = 1;

const QUEUE_CAPACITY: usize = 256;

/// Metrics of the synthesis leg of one exchange.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TtsMetrics {
    pub provider: String,
    pub voice: String,
    pub model: String,
    pub audio_format: String,
    pub ttfa_ms: Option<u64>,
    pub generation_ms: u64,
    pub playback_ms: u64,
    pub bytes: u64,
}

/// Metrics of the recording leg.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecordMetrics {
    pub duration_ms: u64,
    pub stopped_reason: String,
    pub bytes: u64,
}

/// Metrics of the transcription leg.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SttMetrics {
    pub provider: String,
    pub model: String,
    pub audio_format: String,
    pub latency_ms: u64,
    pub text_len: usize,
}

/// One line in the exchanges stream; one per converse call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub schema_version: u32,
    pub conversation_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt: Option<SttMetrics>,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum Line {
    Event(serde_json::Value),
    Exchange(serde_json::Value),
    Shutdown,
}

struct ConversationState {
    current: Option<String>,
    last_event: Option<Instant>,
}

/// Handle to the logging subsystem. Cheap to clone.
#[derive(Clone)]
pub struct EventLog {
    tx: mpsc::Sender<Line>,
    conv: Arc<Mutex<ConversationState>>,
    gap: Duration,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EventLog {
    pub fn new(paths: &Paths) -> Self {
        Self::with_gap(paths, CONVERSATION_GAP)
    }

    /// Testable constructor with an explicit inactivity gap.
    pub fn with_gap(paths: &Paths, gap: Duration) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let writer = Writer {
            events_dir: paths.events_dir(),
            exchanges_dir: paths.exchanges_dir(),
            open_events: None,
            open_exchanges: None,
        };
        let task = tokio::spawn(writer.run(rx));
        Self {
            tx,
            conv: Arc::new(Mutex::new(ConversationState {
                current: None,
                last_event: None,
            })),
            gap,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// The active conversation id, minting a new one after the inactivity
    /// gap or on first use. Single source of truth for conversation ids.
    pub fn conversation_id(&self) -> String {
        let mut state = self.conv.lock().unwrap();
        let expired = match state.last_event {
            Some(at) => at.elapsed() >= self.gap,
            None => true,
        };
        if expired || state.current.is_none() {
            let mut suffix = uuid::Uuid::new_v4().simple().to_string();
            suffix.truncate(8);
            let id = format!("conv_{}_{}", Local::now().format("%Y%m%d_%H%M%S"), suffix);
            state.current = Some(id);
        }
        state.current.clone().unwrap_or_default()
    }

    /// Append one event line. Non-blocking; a full queue drops the line
    /// with a warning.
    pub fn log_event(&self, kind: &str, fields: serde_json::Value) {
        let conversation_id = self.conversation_id();
        {
            let mut state = self.conv.lock().unwrap();
            state.last_event = Some(Instant::now());
        }
        let mut line = json!({
            "schema_version": SCHEMA_VERSION,
            "timestamp": Utc::now(),
            "conversation_id": conversation_id,
            "event": kind,
        });
        if let (Some(obj), Some(extra)) = (line.as_object_mut(), fields.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        if self.tx.try_send(Line::Event(line)).is_err() {
            warn!(kind, "Event log queue full, dropping line");
        }
    }

    /// Append one exchange record line.
    pub fn append_exchange(&self, record: &ExchangeRecord) {
        match serde_json::to_value(record) {
            Ok(line) => {
                if self.tx.try_send(Line::Exchange(line)).is_err() {
                    warn!("Exchange log queue full, dropping record");
                }
            }
            Err(e) => warn!("Failed to serialize exchange record: {}", e),
        }
    }

    /// Flush and stop the writer. Lines enqueued before this call are
    /// written; later sends are dropped.
    pub async fn shutdown(&self) {
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = self.tx.send(Line::Shutdown).await;
            let _ = task.await;
        }
    }
}

struct Writer {
    events_dir: PathBuf,
    exchanges_dir: PathBuf,
    /// (date, handle) pairs; reopened when the local date rolls.
    open_events: Option<(String, File)>,
    open_exchanges: Option<(String, File)>,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::Receiver<Line>) {
        while let Some(line) = rx.recv().await {
            match line {
                Line::Event(v) => self.write(true, &v),
                Line::Exchange(v) => self.write(false, &v),
                Line::Shutdown => break,
            }
        }
        self.flush_all();
    }

    fn write(&mut self, events: bool, value: &serde_json::Value) {
        let date = Local::now().format("%Y-%m-%d").to_string();
        let (dir, slot) = if events {
            (&self.events_dir, &mut self.open_events)
        } else {
            (&self.exchanges_dir, &mut self.open_exchanges)
        };

        let needs_reopen = slot.as_ref().map(|(d, _)| d != &date).unwrap_or(true);
        if needs_reopen {
            // Flush the previous day's handle before rolling over.
            if let Some((_, mut old)) = slot.take() {
                let _ = old.flush();
            }
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("voicemode: cannot create log dir {}: {}", dir.display(), e);
                return;
            }
            let path = dir.join(format!("{date}.jsonl"));
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => *slot = Some((date, file)),
                Err(e) => {
                    eprintln!("voicemode: cannot open {}: {}", path.display(), e);
                    return;
                }
            }
        }

        if let Some((_, file)) = slot {
            let mut buf = value.to_string();
            buf.push('\n');
            if let Err(e) = file.write_all(buf.as_bytes()).and_then(|_| file.flush()) {
                // A failed write is reported to stderr and discarded.
                eprintln!("voicemode: log write failed: {e}");
            }
        }
    }

    fn flush_all(&mut self) {
        for slot in [&mut self.open_events, &mut self.open_exchanges] {
            if let Some((_, file)) = slot {
                let _ = file.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_paths() -> (tempfile::TempDir, Paths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        (dir, paths)
    }

    fn record(conv: &str) -> ExchangeRecord {
        ExchangeRecord {
            schema_version: SCHEMA_VERSION,
            conversation_id: conv.to_string(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            tts: Some(TtsMetrics {
                provider: "kokoro".into(),
                voice: "af_sky".into(),
                model: "tts-1".into(),
                audio_format: "pcm".into(),
                ttfa_ms: Some(412),
                generation_ms: 1890,
                playback_ms: 2400,
                bytes: 115_200,
            }),
            record: Some(RecordMetrics {
                duration_ms: 3120,
                stopped_reason: "silence".into(),
                bytes: 149_760,
            }),
            stt: Some(SttMetrics {
                provider: "whisper".into(),
                model: "whisper-1".into(),
                audio_format: "wav".into(),
                latency_ms: 730,
                text_len: 42,
            }),
            outcome: "success".into(),
            error: None,
        }
    }

    #[tokio::test]
    async fn events_land_as_jsonl_with_required_fields() {
        let (_dir, paths) = temp_paths();
        let log = EventLog::new(&paths);
        log.log_event("turn_started", json!({"transport": "local"}));
        log.log_event("tts_start", json!({"endpoint": "http://127.0.0.1:8880/v1"}));
        log.shutdown().await;

        let date = Local::now().format("%Y-%m-%d").to_string();
        let contents =
            std::fs::read_to_string(paths.events_dir().join(format!("{date}.jsonl"))).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["schema_version"], 1);
        assert_eq!(first["event"], "turn_started");
        assert_eq!(first["transport"], "local");
        assert!(first["conversation_id"].as_str().unwrap().starts_with("conv_"));

        // Timestamps within the file are non-decreasing.
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(first["timestamp"].as_str().unwrap() <= second["timestamp"].as_str().unwrap());
    }

    #[tokio::test]
    async fn exchange_records_round_trip_through_jsonl() {
        let (_dir, paths) = temp_paths();
        let log = EventLog::new(&paths);
        let rec = record("conv_20260801_120000_abcd1234");
        log.append_exchange(&rec);
        log.shutdown().await;

        let date = Local::now().format("%Y-%m-%d").to_string();
        let contents =
            std::fs::read_to_string(paths.exchanges_dir().join(format!("{date}.jsonl"))).unwrap();
        let parsed: ExchangeRecord = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.conversation_id, rec.conversation_id);
        assert_eq!(parsed.tts.as_ref().unwrap().ttfa_ms, Some(412));
        assert_eq!(parsed.record.as_ref().unwrap().stopped_reason, "silence");
        assert_eq!(parsed.stt.as_ref().unwrap().text_len, 42);
        // Millisecond precision survives the round trip.
        assert_eq!(
            parsed.started_at.timestamp_millis(),
            rec.started_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn conversation_id_is_stable_within_the_gap() {
        let (_dir, paths) = temp_paths();
        let log = EventLog::new(&paths);
        let a = log.conversation_id();
        log.log_event("turn_started", json!({}));
        let b = log.conversation_id();
        assert_eq!(a, b);
        log.shutdown().await;
    }

    #[tokio::test]
    async fn conversation_id_rolls_after_inactivity() {
        let (_dir, paths) = temp_paths();
        let log = EventLog::with_gap(&paths, Duration::from_millis(30));
        log.log_event("turn_started", json!({}));
        let a = log.conversation_id();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let b = log.conversation_id();
        assert_ne!(a, b);
        log.shutdown().await;
    }
}
