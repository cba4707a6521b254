//! Per-request debug dumps.
//!
//! When a dump directory is configured, every request appends JSONL records
//! (one per protocol hop) to `requests.jsonl` under that directory. The sink
//! is write-only and must never fail a request: IO errors are logged and
//! swallowed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Serialize)]
struct DebugRecord<'a> {
    timestamp: DateTime<Utc>,
    request_id: &'a str,
    hop: &'a str,
    payload: &'a serde_json::Value,
}

/// Shared handle to the dump file. Cheap to clone; a disabled sink is a
/// no-op.
#[derive(Clone, Default)]
pub struct DebugSink {
    writer: Option<Arc<Mutex<BufWriter<File>>>>,
}

impl DebugSink {
    /// Open (or create) `requests.jsonl` under `dir`.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("requests.jsonl"))?;
        Ok(Self {
            writer: Some(Arc::new(Mutex::new(BufWriter::new(file)))),
        })
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Append one record. `hop` names the protocol boundary the payload was
    /// captured at (`ingress`, `egress`, `upstream_response`, ...).
    pub fn record(&self, request_id: &str, hop: &str, payload: &serde_json::Value) {
        let Some(ref writer) = self.writer else {
            return;
        };

        let record = DebugRecord {
            timestamp: Utc::now(),
            request_id,
            hop,
            payload,
        };

        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };

        match writer.lock() {
            Ok(mut w) => {
                if writeln!(w, "{json}").and_then(|()| w.flush()).is_err() {
                    warn!(request_id, "Failed to write debug record");
                }
            }
            Err(_) => warn!(request_id, "Debug sink mutex poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_sink_is_noop() {
        let sink = DebugSink::disabled();
        assert!(!sink.is_enabled());
        sink.record("req-1", "ingress", &serde_json::json!({"ok": true}));
    }

    #[test]
    fn test_records_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::open(dir.path()).unwrap();
        assert!(sink.is_enabled());

        sink.record("req-1", "ingress", &serde_json::json!({"model": "m"}));
        sink.record("req-1", "egress", &serde_json::json!({"model": "gpt-4o"}));

        let content = std::fs::read_to_string(dir.path().join("requests.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["request_id"], "req-1");
        assert_eq!(first["hop"], "ingress");
        assert_eq!(first["payload"]["model"], "m");
    }
}
