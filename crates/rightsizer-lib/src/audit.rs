//! Audit trail for state-changing actions
//!
//! One JSON object per line:
//! `{timestamp, event, clusterName, changes?, correlationId}`.
//! Every event is also emitted through `tracing` under the `audit` target.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEventKind {
    RunStarted,
    ConfigRead,
    ConfigModify,
    ConfigRevert,
    ResourceCreate,
    ResourceCreateResult,
    StatusChange,
    ManualRestore,
    RunReported,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::RunStarted => "run-started",
            AuditEventKind::ConfigRead => "config-read",
            AuditEventKind::ConfigModify => "config-modify",
            AuditEventKind::ConfigRevert => "config-revert",
            AuditEventKind::ResourceCreate => "resource-create",
            AuditEventKind::ResourceCreateResult => "resource-create-result",
            AuditEventKind::StatusChange => "status-change",
            AuditEventKind::ManualRestore => "manual-restore",
            AuditEventKind::RunReported => "run-reported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEventKind,
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<String>>,
    pub correlation_id: Uuid,
    /// Event-specific fields such as success flags or resource ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(event: AuditEventKind, cluster_name: &str, correlation_id: Uuid) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            cluster_name: cluster_name.to_string(),
            changes: None,
            correlation_id,
            detail: None,
        }
    }

    pub fn with_changes(mut self, changes: Vec<String>) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn write(&self, event: &AuditEvent) -> Result<()>;
}

/// Appends JSON lines to a file
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit log {:?}", path))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn write(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event).context("Failed to serialize audit event")?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(&line).context("Failed to append audit event")?;
        file.flush().context("Failed to flush audit log")?;
        Ok(())
    }
}

/// Keeps events in memory
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events().iter().map(|e| e.event).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn write(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Fan-out audit log
///
/// A failing sink is logged and skipped; auditing never aborts a run.
#[derive(Clone, Default)]
pub struct AuditLog {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn record(&self, event: AuditEvent) {
        info!(
            target: "audit",
            event = event.event.as_str(),
            cluster = %event.cluster_name,
            correlation_id = %event.correlation_id,
            changes = ?event.changes,
            detail = ?event.detail,
            "Audit event"
        );
        for sink in &self.sinks {
            if let Err(e) = sink.write(&event) {
                warn!(error = %e, event = event.event.as_str(), "Failed to write audit event");
            }
        }
    }
}

/// Read a JSON-lines audit file, optionally filtered by correlation id
pub fn read_events(path: &Path, correlation_id: Option<Uuid>) -> Result<Vec<AuditEvent>> {
    let file = File::open(path).with_context(|| format!("Failed to open audit log {:?}", path))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("Failed to read audit log")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line)
            .with_context(|| format!("Malformed audit event on line {}", idx + 1))?;
        if correlation_id.map_or(true, |id| id == event.correlation_id) {
            events.push(event);
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_event_wire_format() {
        let id = Uuid::new_v4();
        let event = AuditEvent::new(AuditEventKind::ConfigModify, "nightly-etl", id)
            .with_changes(vec!["CORE: r5.4xlarge -> r5.2xlarge".into()]);
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "config-modify");
        assert_eq!(json["clusterName"], "nightly-etl");
        assert_eq!(json["correlationId"], id.to_string());
        assert_eq!(json["changes"][0], "CORE: r5.4xlarge -> r5.2xlarge");
        assert!(json.get("timestamp").is_some());
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit").join("events.jsonl");
        let sink = Arc::new(FileAuditSink::open(&path).unwrap());
        let log = AuditLog::new().with_sink(sink);

        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();
        log.record(AuditEvent::new(AuditEventKind::ConfigRead, "a", run_a));
        log.record(AuditEvent::new(AuditEventKind::ConfigRead, "b", run_b));
        log.record(AuditEvent::new(AuditEventKind::ConfigRevert, "a", run_a));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);

        let events = read_events(&path, Some(run_a)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, AuditEventKind::ConfigRevert);
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        struct Broken;
        impl AuditSink for Broken {
            fn write(&self, _: &AuditEvent) -> Result<()> {
                anyhow::bail!("disk full")
            }
        }

        let memory = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new()
            .with_sink(Arc::new(Broken))
            .with_sink(memory.clone());
        log.record(AuditEvent::new(AuditEventKind::StatusChange, "a", Uuid::new_v4()));
        assert_eq!(memory.kinds(), vec![AuditEventKind::StatusChange]);
    }
}
