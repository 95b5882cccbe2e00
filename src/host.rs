//! Outward channel to the host process.
//!
//! The core never writes to a console for the host's benefit. Persisted
//! events, diagnostics and per-project startup failures travel as
//! [`HostMessage`]s over a bounded channel; the binary serializes them one
//! JSON object per line on stdout.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::event::{ChangeEvent, now};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

/// `{source, level, message, timestamp}` record for the host's log view.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRecord {
    pub source: String,
    pub level: DiagnosticLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostMessage {
    /// A change event that has been durably persisted.
    Change { event: ChangeEvent },
    Log(DiagnosticRecord),
    /// A project could not be watched at all.
    #[serde(rename_all = "camelCase")]
    WatchFailed { project_path: PathBuf, error: String },
}

/// Sending half of the host channel. Cheap to clone.
///
/// Diagnostics use `try_send`: when the host is slow or gone they are
/// dropped and the pipeline carries on. Change events wait for capacity
/// so each persisted event is delivered exactly once while the host listens.
#[derive(Debug, Clone)]
pub struct HostSink {
    tx: Option<mpsc::Sender<HostMessage>>,
}

impl HostSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<HostMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink with no host attached; every message is discarded.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub async fn emit_change(&self, event: ChangeEvent) {
        let Some(tx) = &self.tx else { return };
        if tx.send(HostMessage::Change { event }).await.is_err() {
            tracing::debug!("host channel closed; change notification dropped");
        }
    }

    pub fn watch_failed(&self, project_path: &Path, error: impl ToString) {
        self.try_emit(HostMessage::WatchFailed {
            project_path: project_path.to_path_buf(),
            error: error.to_string(),
        });
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(source, "{message}");
        self.log(source, DiagnosticLevel::Info, message);
    }

    pub fn warn(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(source, "{message}");
        self.log(source, DiagnosticLevel::Warn, message);
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(source, "{message}");
        self.log(source, DiagnosticLevel::Error, message);
    }

    fn log(&self, source: &str, level: DiagnosticLevel, message: String) {
        self.try_emit(HostMessage::Log(DiagnosticRecord {
            source: source.to_string(),
            level,
            message,
            timestamp: now(),
        }));
    }

    fn try_emit(&self, message: HostMessage) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(message);
        }
    }
}
