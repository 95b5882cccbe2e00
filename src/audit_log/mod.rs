pub mod migrate;

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::AsyncWriteExt;

use crate::event::ChangeEvent;
use crate::project::ProjectLayout;

pub use migrate::MigrationOutcome;

/// Append-only, one-JSON-object-per-line event log for one project.
///
/// Single writer per project; any number of concurrent readers. A reader
/// never yields a line whose terminating newline has not been written yet.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    migration: MigrationOutcome,
}

impl AuditLog {
    /// Open the log at `path`, migrating a legacy whole-array file first.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let migration = migrate::migrate_legacy(&path)?;
        Ok(Self { path, migration })
    }

    pub fn for_layout(layout: &ProjectLayout) -> anyhow::Result<Self> {
        Self::open(layout.log_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What the open-time legacy check did.
    pub fn migration(&self) -> &MigrationOutcome {
        &self.migration
    }

    /// Durably append one event as a single line.
    ///
    /// The line and its newline go out in one `write_all` on an `O_APPEND`
    /// handle, then the data is synced before returning.
    pub async fn append(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Stream every event, oldest first. A missing log is an empty stream.
    pub fn stream(&self) -> anyhow::Result<LogReader> {
        let reader = match File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to open {}", self.path.display()));
            }
        };
        Ok(LogReader {
            reader,
            path: self.path.clone(),
            buf: Vec::new(),
            line_no: 0,
            skipped: 0,
        })
    }
}

/// Lazy iterator over the events of one log file.
///
/// Malformed lines are logged and skipped. An unterminated final line is
/// an append still in flight and ends the stream.
pub struct LogReader {
    reader: Option<BufReader<File>>,
    path: PathBuf,
    buf: Vec<u8>,
    line_no: usize,
    skipped: usize,
}

impl LogReader {
    /// Number of malformed lines skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for LogReader {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<ChangeEvent> {
        let reader = self.reader.as_mut()?;
        loop {
            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    if self.buf.last() != Some(&b'\n') {
                        return None;
                    }
                    self.line_no += 1;
                    if self.buf.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match serde_json::from_slice::<ChangeEvent>(&self.buf) {
                        Ok(event) => return Some(event),
                        Err(err) => {
                            self.skipped += 1;
                            tracing::warn!(
                                path = %self.path.display(),
                                line = self.line_no,
                                error = %err,
                                "malformed audit log line; skipping"
                            );
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(
                        path = %self.path.display(),
                        error = %err,
                        "audit log read failed; stopping scan"
                    );
                    self.reader = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::event::{Change, ChangeKind, now};

    fn make_event(id: &str, change: Change, path: &str, user: &str) -> ChangeEvent {
        ChangeEvent {
            id: id.to_string(),
            change,
            path: path.to_string(),
            timestamp: now(),
            user: user.to_string(),
            project_path: PathBuf::from("/proj"),
        }
    }

    #[tokio::test]
    async fn test_append_and_stream_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("change_log.json")).unwrap();
        for i in 0..5 {
            let event = make_event(
                &format!("e{i}"),
                Change::Created { snapshot_id: None },
                "a.txt",
                "alice",
            );
            log.append(&event).await.unwrap();
        }
        let ids: Vec<String> = log.stream().unwrap().map(|e| e.id).collect();
        assert_eq!(ids, vec!["e0", "e1", "e2", "e3", "e4"]);

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 5);
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn test_missing_log_streams_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("change_log.json")).unwrap();
        assert_eq!(log.stream().unwrap().count(), 0);
        assert_eq!(log.migration(), &MigrationOutcome::NotNeeded);
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("change_log.json")).unwrap();
        log.append(&make_event("good-1", Change::Created { snapshot_id: None }, "a", "u"))
            .await
            .unwrap();
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(log.path()).unwrap();
            writeln!(f, "{{not json at all").unwrap();
            writeln!(f).unwrap();
        }
        log.append(&make_event(
            "good-2",
            Change::Deleted { previous_snapshot_id: None },
            "a",
            "u",
        ))
        .await
        .unwrap();

        let mut reader = log.stream().unwrap();
        let events: Vec<ChangeEvent> = reader.by_ref().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "good-1");
        assert_eq!(events[1].kind(), ChangeKind::Deleted);
        assert_eq!(reader.skipped(), 1);
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_not_yielded() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("change_log.json")).unwrap();
        log.append(&make_event("done", Change::Created { snapshot_id: None }, "a", "u"))
            .await
            .unwrap();
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(log.path()).unwrap();
            write!(f, r#"{{"id":"half","type":"CREA"#).unwrap();
        }
        let ids: Vec<String> = log.stream().unwrap().map(|e| e.id).collect();
        assert_eq!(ids, vec!["done"]);
    }
}
