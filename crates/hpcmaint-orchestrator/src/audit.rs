//! Append-only audit log
//!
//! Every phase transition lands here as one line of newline-delimited JSON:
//! `ts` (RFC 3339 UTC, seconds precision), `phase`, `action`, `host`, plus
//! phase-specific fields. The write is a single mutex-guarded append+flush so
//! records never interleave and the per-host sequence stays monotonic.
//!
//! Append failures are logged and swallowed: losing an audit line must never
//! fail a maintenance workflow.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use hpcmaint_core::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// One audit line.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub ts: String,
    pub phase: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl AuditRecord {
    /// Start a record; `ts` is stamped at append time.
    pub fn new(phase: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            ts: String::new(),
            phase: phase.into(),
            action: action.into(),
            host: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn host(mut self, hostname: impl Into<String>) -> Self {
        self.host = Some(hostname.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Mark the record as produced by a dry run. Only emitted when true.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        if dry_run {
            self.fields.insert("dry_run".to_string(), Value::Bool(true));
        }
        self
    }
}

/// Serialized JSONL sink.
pub struct AuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditSink {
    /// Open (or create) the sink, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one record. Never fails the caller.
    pub fn append(&self, mut record: AuditRecord) {
        record.ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "could not serialize audit record");
                return;
            }
        };
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            warn!(path = %self.path.display(), error = %e, "audit append failed");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_append_writes_one_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::open(dir.path().join("events.jsonl")).unwrap();
        sink.append(
            AuditRecord::new("drain", "requested")
                .host("GPU-332")
                .field("reason", "HPCRDMA-0002-02"),
        );

        let lines = read_lines(sink.path());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["phase"], "drain");
        assert_eq!(lines[0]["action"], "requested");
        assert_eq!(lines[0]["host"], "GPU-332");
        assert_eq!(lines[0]["reason"], "HPCRDMA-0002-02");
        // RFC 3339 UTC at seconds precision ends in Z with no fraction.
        let ts = lines[0]["ts"].as_str().unwrap();
        assert!(ts.ends_with('Z') && !ts.contains('.'), "{ts}");
    }

    #[test]
    fn test_dry_run_marker_only_when_set() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::open(dir.path().join("events.jsonl")).unwrap();
        sink.append(AuditRecord::new("drain", "requested").dry_run(true));
        sink.append(AuditRecord::new("drain", "requested").dry_run(false));

        let lines = read_lines(sink.path());
        assert_eq!(lines[0]["dry_run"], true);
        assert!(lines[1].get("dry_run").is_none());
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs/sub/events.jsonl");
        let sink = AuditSink::open(&nested).unwrap();
        sink.append(AuditRecord::new("discover", "start"));
        assert!(nested.exists());
    }

    #[test]
    fn test_appends_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::open(dir.path().join("events.jsonl")).unwrap();
        for action in ["requested", "drained_empty"] {
            sink.append(AuditRecord::new("drain", action).host("GPU-1"));
        }
        let lines = read_lines(sink.path());
        assert_eq!(lines[0]["action"], "requested");
        assert_eq!(lines[1]["action"], "drained_empty");
    }
}
