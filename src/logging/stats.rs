//! Rolling window of recent exchanges.
//!
//! Single writer (the turn engine), many readers (the statistics tools).
//! Readers get a snapshot copy; they never block the writer for long.

use std::collections::VecDeque;
use std::sync::RwLock;

use serde::Serialize;

use super::ExchangeRecord;

const DEFAULT_CAPACITY: usize = 1000;

/// Bounded ring of the most recent exchange records.
pub struct StatsWindow {
    ring: RwLock<VecDeque<ExchangeRecord>>,
    capacity: usize,
}

/// Aggregate view over the window.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub exchanges: usize,
    pub successes: usize,
    pub failures: usize,
    pub mean_ttfa_ms: Option<f64>,
    pub mean_stt_latency_ms: Option<f64>,
    pub total_recorded_ms: u64,
    pub total_text_len: usize,
}

impl StatsWindow {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, record: ExchangeRecord) {
        let mut ring = self.ring.write().unwrap();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    /// Most recent records, newest last, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<ExchangeRecord> {
        let ring = self.ring.read().unwrap();
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> StatsSummary {
        let ring = self.ring.read().unwrap();
        let exchanges = ring.len();
        let successes = ring.iter().filter(|r| r.outcome == "success").count();

        let ttfas: Vec<u64> = ring
            .iter()
            .filter_map(|r| r.tts.as_ref().and_then(|t| t.ttfa_ms))
            .collect();
        let stt_latencies: Vec<u64> = ring
            .iter()
            .filter_map(|r| r.stt.as_ref().map(|s| s.latency_ms))
            .collect();

        let mean = |values: &[u64]| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<u64>() as f64 / values.len() as f64)
            }
        };

        StatsSummary {
            exchanges,
            successes,
            failures: exchanges - successes,
            mean_ttfa_ms: mean(&ttfas),
            mean_stt_latency_ms: mean(&stt_latencies),
            total_recorded_ms: ring
                .iter()
                .filter_map(|r| r.record.as_ref().map(|rec| rec.duration_ms))
                .sum(),
            total_text_len: ring
                .iter()
                .filter_map(|r| r.stt.as_ref().map(|s| s.text_len))
                .sum(),
        }
    }
}

impl Default for StatsWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{RecordMetrics, SttMetrics, TtsMetrics, SCHEMA_VERSION};
    use chrono::Utc;

    fn record(outcome: &str, ttfa: Option<u64>) -> ExchangeRecord {
        ExchangeRecord {
            schema_version: SCHEMA_VERSION,
            conversation_id: "conv_20260801_100000_aaaa0000".into(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            tts: ttfa.map(|t| TtsMetrics {
                ttfa_ms: Some(t),
                ..Default::default()
            }),
            record: Some(RecordMetrics {
                duration_ms: 1500,
                stopped_reason: "silence".into(),
                bytes: 72_000,
            }),
            stt: Some(SttMetrics {
                latency_ms: 600,
                text_len: 10,
                ..Default::default()
            }),
            outcome: outcome.into(),
            error: None,
        }
    }

    #[test]
    fn window_is_bounded() {
        let window = StatsWindow::with_capacity(3);
        for _ in 0..5 {
            window.push(record("success", Some(100)));
        }
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn summary_aggregates_the_window() {
        let window = StatsWindow::new();
        window.push(record("success", Some(100)));
        window.push(record("success", Some(300)));
        window.push(record("stt_failed", None));

        let s = window.summary();
        assert_eq!(s.exchanges, 3);
        assert_eq!(s.successes, 2);
        assert_eq!(s.failures, 1);
        assert_eq!(s.mean_ttfa_ms, Some(200.0));
        assert_eq!(s.mean_stt_latency_ms, Some(600.0));
        assert_eq!(s.total_recorded_ms, 4500);
        assert_eq!(s.total_text_len, 30);
    }

    #[test]
    fn recent_returns_newest_last() {
        let window = StatsWindow::with_capacity(10);
        window.push(record("success", Some(1)));
        window.push(record("success", Some(2)));
        window.push(record("success", Some(3)));
        let recent = window.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].tts.as_ref().unwrap().ttfa_ms, Some(3));
    }
}
