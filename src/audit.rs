//! Audit events
//!
//! The engine reports every terminal file outcome and every key-store
//! mutation as an [`AuditEvent`] through an [`AuditSink`]. It never reads the
//! trail back. [`AuditLog`] is an in-memory sink that stamps each event and
//! can export the trail as JSON.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Encrypt,
    Decrypt,
    KeyGenerated,
    KeyImported,
    KeyExported,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
    Warning,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditStatus::Success => "success",
            AuditStatus::Error => "error",
            AuditStatus::Warning => "warning",
        })
    }
}

/// Algorithm label used for events not tied to any algorithm.
pub const NO_ALGORITHM: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub algorithm: String,
    pub status: AuditStatus,
    pub message: String,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        status: AuditStatus,
        algorithm: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action,
            filename: None,
            algorithm: algorithm.into(),
            status,
            message: message.into(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Receiver of audit events.
pub trait AuditSink {
    fn record(&mut self, event: AuditEvent);
}

impl AuditSink for Vec<AuditEvent> {
    fn record(&mut self, event: AuditEvent) {
        self.push(event);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub success: usize,
    pub error: usize,
    pub warning: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogExport<'a> {
    export_date: DateTime<Utc>,
    total_entries: usize,
    logs: &'a [LogEntry],
}

/// Append-only, in-memory audit trail.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Vec<LogEntry>,
    next_id: u64,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn filter(&self, status: AuditStatus) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.event.status == status)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            total: self.entries.len(),
            ..StatusCounts::default()
        };
        for entry in &self.entries {
            match entry.event.status {
                AuditStatus::Success => counts.success += 1,
                AuditStatus::Error => counts.error += 1,
                AuditStatus::Warning => counts.warning += 1,
            }
        }
        counts
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Pretty JSON document `{exportDate, totalEntries, logs}`.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&LogExport {
            export_date: Utc::now(),
            total_entries: self.entries.len(),
            logs: &self.entries,
        })
    }
}

impl AuditSink for AuditLog {
    fn record(&mut self, event: AuditEvent) {
        let (action, filename) = (&event.action, &event.filename);
        match event.status {
            AuditStatus::Success => tracing::info!(?action, ?filename, "{}", event.message),
            AuditStatus::Warning => tracing::warn!(?action, ?filename, "{}", event.message),
            AuditStatus::Error => tracing::error!(?action, ?filename, "{}", event.message),
        }
        self.next_id += 1;
        self.entries.push(LogEntry {
            id: self.next_id.to_string(),
            timestamp: Utc::now(),
            event,
        });
    }
}
