//! Structured scan events.
//!
//! The pipeline never prints. It reports [`ScanEvent`]s to an [`EventSink`]
//! and the caller decides where they go: tracing, a JSONL file, a progress
//! bar, or nowhere.

use crate::report::{ScanStatus, Stage};
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanStarted {
        root: String,
        patterns: usize,
    },
    ResourceFetched {
        url: String,
        ordinal: String,
        bytes: usize,
        content_type: Option<String>,
    },
    ResourceFailed {
        url: String,
        ordinal: String,
        stage: Stage,
        reason: String,
    },
    UnitsExtracted {
        url: String,
        ordinal: String,
        units: usize,
    },
    MatchesFound {
        url: String,
        ordinal: String,
        matches: usize,
    },
    Truncated {
        max_resources: usize,
    },
    Cancelled,
    ScanFinished {
        status: ScanStatus,
        matches: usize,
        failures: usize,
        resources: usize,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ScanEvent);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &ScanEvent) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ScanEvent) {
        match event {
            ScanEvent::ScanStarted { root, patterns } => {
                info!(%root, patterns, "scan started");
            }
            ScanEvent::ResourceFetched {
                url,
                ordinal,
                bytes,
                content_type,
            } => {
                debug!(%url, %ordinal, bytes, content_type = content_type.as_deref().unwrap_or("-"), "fetched");
            }
            ScanEvent::ResourceFailed {
                url,
                ordinal,
                stage,
                reason,
            } => {
                warn!(%url, %ordinal, ?stage, "{reason}");
            }
            ScanEvent::UnitsExtracted { url, ordinal, units } => {
                debug!(%url, %ordinal, units, "extracted");
            }
            ScanEvent::MatchesFound { url, ordinal, matches } => {
                info!(%url, %ordinal, matches, "matches found");
            }
            ScanEvent::Truncated { max_resources } => {
                warn!(max_resources, "resource cap reached, scan truncated");
            }
            ScanEvent::Cancelled => warn!("scan cancelled"),
            ScanEvent::ScanFinished {
                status,
                matches,
                failures,
                resources,
            } => {
                info!(?status, matches, failures, resources, "scan finished");
            }
        }
    }
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    scan_id: &'a str,
    timestamp: String,
    #[serde(flatten)]
    event: &'a ScanEvent,
}

/// Appends one JSON object per event to a file, tagged with a per-scan id
/// and an RFC 3339 timestamp.
pub struct JsonlSink {
    file: Mutex<File>,
    scan_id: String,
}

impl JsonlSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open event log: {}", path.display()))?;

        Ok(Self {
            file: Mutex::new(file),
            scan_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &ScanEvent) {
        let record = JsonlRecord {
            scan_id: &self.scan_id,
            timestamp: Utc::now().to_rfc3339(),
            event,
        };
        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };
        if let Ok(mut file) = self.file.lock() {
            if let Err(e) = writeln!(file, "{json}") {
                warn!("event log write failed: {e}");
            }
        }
    }
}

/// Spinner on stderr showing fetch progress.
pub struct ProgressSink {
    bar: ProgressBar,
}

impl ProgressSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {pos} fetched {msg}") {
            bar.set_style(style.tick_chars("\u{25b8}\u{25b9}\u{25b8}\u{25b9}\u{25b8}"));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ProgressSink {
    fn emit(&self, event: &ScanEvent) {
        match event {
            ScanEvent::ResourceFetched { url, .. } => {
                self.bar.inc(1);
                self.bar.set_message(url.clone());
            }
            ScanEvent::ScanFinished { .. } => self.bar.finish_and_clear(),
            _ => {}
        }
    }
}

/// Sends every event to each inner sink, in order.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for MultiSink {
    fn emit(&self, event: &ScanEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ScanEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &ScanEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_lines_share_scan_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        let sink = JsonlSink::open(&path).unwrap();

        sink.emit(&ScanEvent::ScanStarted {
            root: "https://example.com/".to_string(),
            patterns: 1,
        });
        sink.emit(&ScanEvent::ResourceFailed {
            url: "https://example.com/x.js".to_string(),
            ordinal: "0".to_string(),
            stage: Stage::Fetch,
            reason: "HTTP status 404".to_string(),
        });

        let data = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = data
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "scan_started");
        assert_eq!(lines[1]["event"], "resource_failed");
        assert_eq!(lines[1]["stage"], "fetch");
        assert_eq!(lines[0]["scan_id"], sink.scan_id());
        assert_eq!(lines[0]["scan_id"], lines[1]["scan_id"]);
        assert!(chrono::DateTime::parse_from_rfc3339(lines[0]["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_multi_sink_fans_out() {
        let a = Arc::new(CollectingSink::new());
        let b = Arc::new(CollectingSink::new());
        let multi = MultiSink::new().with(a.clone()).with(b.clone());

        multi.emit(&ScanEvent::Cancelled);
        assert_eq!(a.events(), vec![ScanEvent::Cancelled]);
        assert_eq!(b.events(), vec![ScanEvent::Cancelled]);
    }
}
