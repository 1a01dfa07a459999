//! Run log sink
//!
//! Every progress notification, warning and terminal status of a run goes
//! through a [`LogSink`]. [`RunLog`] keeps an append-only record, broadcasts
//! each record to subscribers and mirrors it into `tracing`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use photomesh_artifacts::ArtifactKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::stage::StageId;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured run event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Message {
        text: String,
    },
    StageStarted {
        stage: StageId,
        planned_secs: f64,
    },
    Progress {
        stage: StageId,
        percent: f64,
        elapsed_secs: f64,
        metric: u64,
        unit: String,
    },
    StageCompleted {
        stage: StageId,
    },
    ArtifactWritten {
        kind: ArtifactKind,
        file_name: String,
        elements: usize,
        bytes: u64,
    },
    Terminal {
        state: String,
        status: String,
    },
}

impl RunEvent {
    pub fn message(text: impl Into<String>) -> Self {
        RunEvent::Message { text: text.into() }
    }

    /// One human-readable line
    pub fn describe(&self) -> String {
        match self {
            RunEvent::Message { text } => text.clone(),
            RunEvent::StageStarted {
                stage,
                planned_secs,
            } => format!(
                "Step {}/{}: {} (planned {:.1} min)",
                stage.ordinal() + 1,
                StageId::COUNT,
                stage.title(),
                planned_secs / 60.0
            ),
            RunEvent::Progress {
                stage,
                percent,
                elapsed_secs,
                metric,
                unit,
            } => format!(
                "  {} {:.0}% ({} {}, elapsed {:.1} min)",
                stage.title(),
                percent,
                metric,
                unit,
                elapsed_secs / 60.0
            ),
            RunEvent::StageCompleted { stage } => format!("  {} complete", stage.title()),
            RunEvent::ArtifactWritten {
                file_name,
                elements,
                bytes,
                kind,
            } => format!(
                "Wrote {} ({} {}, {} bytes)",
                file_name,
                elements,
                kind.element_label(),
                bytes
            ),
            RunEvent::Terminal { status, .. } => status.clone(),
        }
    }
}

/// One appended log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub severity: Severity,
    pub event: RunEvent,
}

impl LogRecord {
    pub fn line(&self) -> String {
        format!(
            "[{}] {:<7} {}",
            self.at.format("%H:%M:%S"),
            self.severity.as_str().to_uppercase(),
            self.event.describe()
        )
    }
}

pub trait LogSink: Send + Sync {
    fn emit(&self, severity: Severity, event: RunEvent);

    fn info(&self, text: &str) {
        self.emit(Severity::Info, RunEvent::message(text));
    }

    fn success(&self, text: &str) {
        self.emit(Severity::Success, RunEvent::message(text));
    }

    fn warning(&self, text: &str) {
        self.emit(Severity::Warning, RunEvent::message(text));
    }

    fn error(&self, text: &str) {
        self.emit(Severity::Error, RunEvent::message(text));
    }
}

/// Append-only, broadcasting log of a single run
pub struct RunLog {
    records: Mutex<Vec<LogRecord>>,
    sender: broadcast::Sender<LogRecord>,
    clock: Arc<dyn Clock>,
}

impl RunLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            records: Mutex::new(Vec::new()),
            sender,
            clock,
        }
    }

    /// Receive every record appended after this call
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.sender.subscribe()
    }

    /// Snapshot of everything appended so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for RunLog {
    fn emit(&self, severity: Severity, event: RunEvent) {
        let record = {
            let mut records = self.records.lock();
            let record = LogRecord {
                seq: records.len() as u64,
                at: self.clock.now(),
                severity,
                event,
            };
            records.push(record.clone());
            record
        };

        let line = record.event.describe();
        match severity {
            Severity::Info | Severity::Success => info!(target: "photomesh::run", "{}", line),
            Severity::Warning => warn!(target: "photomesh::run", "{}", line),
            Severity::Error => error!(target: "photomesh::run", "{}", line),
        }

        // no subscribers is fine
        let _ = self.sender.send(record);
    }
}
