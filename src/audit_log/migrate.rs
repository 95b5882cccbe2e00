//! One-time conversion of the legacy whole-array log format.
//!
//! Older installations stored a project's history as a single pretty-printed
//! JSON array. On first access such a file is renamed to `<name>.bak`, parsed,
//! and rewritten at the original path as one event per line. A backup that
//! does not parse is moved to `<name>.corrupt` so it is never retried.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Suffix appended to the log file name for the pre-migration copy.
pub const BACKUP_SUFFIX: &str = ".bak";
/// Suffix appended to the log file name for a legacy file that failed to parse.
pub const CORRUPT_SUFFIX: &str = ".corrupt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Already line-oriented, empty, or absent.
    NotNeeded,
    Migrated { events: usize, backup: PathBuf },
    Quarantined { corrupt: PathBuf, reason: String },
}

/// `<dir>/<file name><suffix>`.
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{filename}{suffix}"))
}

/// Check-and-migrate. Idempotent: a line-oriented file is left untouched.
///
/// A missing log next to an existing backup means an earlier migration was
/// interrupted after the rename; the backup is migrated again.
pub fn migrate_legacy(log_path: &Path) -> anyhow::Result<MigrationOutcome> {
    let backup = sibling(log_path, BACKUP_SUFFIX);

    if log_path.exists() {
        if first_significant_byte(log_path)? != Some(b'[') {
            return Ok(MigrationOutcome::NotNeeded);
        }
        std::fs::rename(log_path, &backup).with_context(|| {
            format!(
                "failed to move legacy log {} to {}",
                log_path.display(),
                backup.display()
            )
        })?;
    } else if !backup.exists() {
        return Ok(MigrationOutcome::NotNeeded);
    }

    let events = match read_legacy_array(&backup) {
        Ok(events) => events,
        Err(err) => {
            let corrupt = sibling(log_path, CORRUPT_SUFFIX);
            std::fs::rename(&backup, &corrupt).with_context(|| {
                format!("failed to quarantine {} as {}", backup.display(), corrupt.display())
            })?;
            tracing::error!(
                log = %log_path.display(),
                corrupt = %corrupt.display(),
                error = %err,
                "legacy audit log is not a valid JSON array; quarantined, history starts empty"
            );
            return Ok(MigrationOutcome::Quarantined {
                corrupt,
                reason: err.to_string(),
            });
        }
    };

    write_lines(log_path, &events)?;
    tracing::info!(
        log = %log_path.display(),
        events = events.len(),
        "migrated legacy audit log to line format"
    );
    Ok(MigrationOutcome::Migrated {
        events: events.len(),
        backup,
    })
}

/// First non-whitespace byte of the file, `None` if it is empty or blank.
fn first_significant_byte(path: &Path) -> anyhow::Result<Option<u8>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    for byte in BufReader::new(file).bytes() {
        let byte = byte?;
        if !byte.is_ascii_whitespace() {
            return Ok(Some(byte));
        }
    }
    Ok(None)
}

fn read_legacy_array(path: &Path) -> anyhow::Result<Vec<serde_json::Value>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let events: Vec<serde_json::Value> = serde_json::from_reader(BufReader::new(file))?;
    Ok(events)
}

/// Write the events one per line, atomically replacing `log_path`.
///
/// Writes a temp file in the same directory, syncs it, then renames it over
/// the target.
fn write_lines(log_path: &Path, events: &[serde_json::Value]) -> anyhow::Result<()> {
    let dir = match log_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(&dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        for event in events {
            serde_json::to_writer(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(log_path).map_err(|err| {
        let kind = err.error.kind();
        anyhow::anyhow!(
            "failed to write migrated log {} ({kind:?}): {}",
            log_path.display(),
            err.error
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_log::AuditLog;
    use crate::event::{ChangeEvent, ChangeKind};

    const LEGACY: &str = r#"[
  {
    "id": "evt-1700000000002-ccccc",
    "type": "DELETED",
    "path": "a.txt",
    "timestamp": "2023-11-14T22:13:22.000Z",
    "user": "bob",
    "projectPath": "/proj",
    "previousSnapshotId": "evt-1700000000001-bbbbb"
  },
  {
    "id": "evt-1700000000001-bbbbb",
    "type": "MODIFIED",
    "path": "a.txt",
    "timestamp": "2023-11-14T22:13:21.000Z",
    "user": "bob",
    "projectPath": "/proj",
    "snapshotId": "evt-1700000000001-bbbbb",
    "previousSnapshotId": "evt-1700000000000-aaaaa"
  },
  {
    "id": "evt-1700000000000-aaaaa",
    "type": "CREATED",
    "path": "a.txt",
    "timestamp": "2023-11-14T22:13:20.000Z",
    "user": "alice",
    "projectPath": "/proj",
    "snapshotId": "evt-1700000000000-aaaaa"
  }
]"#;

    #[test]
    fn test_single_element_legacy_file_becomes_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("change_log.json");
        std::fs::write(
            &log_path,
            r#"[{"id":"e1","type":"CREATED","path":"a.txt","timestamp":"2024-01-01T00:00:00.000Z","user":"alice","projectPath":"/proj"}]"#,
        )
        .unwrap();

        let outcome = migrate_legacy(&log_path).unwrap();
        assert!(matches!(outcome, MigrationOutcome::Migrated { events: 1, .. }));

        let raw = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(raw.starts_with('{'));
        assert!(sibling(&log_path, BACKUP_SUFFIX).exists());
    }

    #[test]
    fn test_migration_round_trip_preserves_array_order() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("change_log.json");
        std::fs::write(&log_path, LEGACY).unwrap();
        let original: Vec<ChangeEvent> = serde_json::from_str(LEGACY).unwrap();

        let log = AuditLog::open(&log_path).unwrap();
        assert!(matches!(log.migration(), MigrationOutcome::Migrated { events: 3, .. }));

        let streamed: Vec<ChangeEvent> = log.stream().unwrap().collect();
        assert_eq!(streamed, original);
        assert_eq!(streamed[0].kind(), ChangeKind::Deleted);
    }

    #[test]
    fn test_second_run_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("change_log.json");
        std::fs::write(&log_path, LEGACY).unwrap();

        migrate_legacy(&log_path).unwrap();
        let after_first = std::fs::read_to_string(&log_path).unwrap();
        let backup = sibling(&log_path, BACKUP_SUFFIX);
        let backup_before = std::fs::read_to_string(&backup).unwrap();

        assert_eq!(migrate_legacy(&log_path).unwrap(), MigrationOutcome::NotNeeded);
        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), after_first);
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), backup_before);
        assert!(!sibling(&log_path, CORRUPT_SUFFIX).exists());
    }

    #[test]
    fn test_line_oriented_file_creates_no_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("change_log.json");
        std::fs::write(&log_path, "  \n{\"id\":\"x\"}\n").unwrap();

        for _ in 0..2 {
            assert_eq!(migrate_legacy(&log_path).unwrap(), MigrationOutcome::NotNeeded);
        }
        assert!(!sibling(&log_path, BACKUP_SUFFIX).exists());
        assert!(!sibling(&log_path, CORRUPT_SUFFIX).exists());
    }

    #[test]
    fn test_corrupt_legacy_file_is_quarantined_once() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("change_log.json");
        std::fs::write(&log_path, "[{\"id\": \"e1\", ").unwrap();

        let outcome = migrate_legacy(&log_path).unwrap();
        assert!(matches!(outcome, MigrationOutcome::Quarantined { .. }));
        assert!(!log_path.exists());
        assert!(!sibling(&log_path, BACKUP_SUFFIX).exists());
        assert!(sibling(&log_path, CORRUPT_SUFFIX).exists());

        // Nothing left to retry on the next access.
        assert_eq!(migrate_legacy(&log_path).unwrap(), MigrationOutcome::NotNeeded);
        assert!(sibling(&log_path, CORRUPT_SUFFIX).exists());
    }

    #[test]
    fn test_interrupted_migration_resumes_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("change_log.json");
        std::fs::write(sibling(&log_path, BACKUP_SUFFIX), LEGACY).unwrap();

        let outcome = migrate_legacy(&log_path).unwrap();
        assert!(matches!(outcome, MigrationOutcome::Migrated { events: 3, .. }));
        assert_eq!(std::fs::read_to_string(&log_path).unwrap().lines().count(), 3);
    }
}
