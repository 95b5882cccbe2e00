use std::path::Path;

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

use crate::audit_log::AuditLog;
use crate::event::{ChangeEvent, ChangeKind};
use crate::project::ProjectLayout;
use crate::snapshot::SnapshotStore;

/// Unchanged lines kept around each change.
pub const CONTEXT_LINES: usize = 3;

/// Emitted after a line that has no trailing newline.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// One contiguous region of a line diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    /// 1-based first line; for an empty side, the line before the insertion point.
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    /// Each line prefixed with ' ', '-', or '+', without its newline.
    pub lines: Vec<String>,
    /// `@@ -a,b +c,d @@`
    pub header: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPatch {
    pub old_file_name: String,
    pub new_file_name: String,
    pub hunks: Vec<Hunk>,
}

/// What a single event changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetails {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Content after the change, or before it for deletions; empty if neither was captured.
    pub content: String,
    /// Present only for modifications with both sides captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<StructuredPatch>,
}

/// Compute a unified-style line diff with `context` lines around each change.
pub fn structured_patch(
    old_file_name: &str,
    new_file_name: &str,
    old: &str,
    new: &str,
    context: usize,
) -> StructuredPatch {
    let diff = TextDiff::from_lines(old, new);
    let mut hunks = Vec::new();

    for group in diff.grouped_ops(context) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;

        let mut lines = Vec::new();
        for op in &group {
            for change in diff.iter_changes(op) {
                let prefix = match change.tag() {
                    ChangeTag::Equal => ' ',
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                };
                let value = change.value();
                let text = value.strip_suffix('\n').unwrap_or(value);
                lines.push(format!("{prefix}{text}"));
                if change.missing_newline() {
                    lines.push(NO_NEWLINE_MARKER.to_string());
                }
            }
        }

        let old_lines = old_range.len();
        let new_lines = new_range.len();
        let old_start = hunk_start(old_range.start, old_lines);
        let new_start = hunk_start(new_range.start, new_lines);
        hunks.push(Hunk {
            old_start,
            old_lines,
            new_start,
            new_lines,
            lines,
            header: format!("@@ -{old_start},{old_lines} +{new_start},{new_lines} @@"),
        });
    }

    StructuredPatch {
        old_file_name: old_file_name.to_string(),
        new_file_name: new_file_name.to_string(),
        hunks,
    }
}

fn hunk_start(zero_based: usize, len: usize) -> usize {
    if len == 0 { zero_based } else { zero_based + 1 }
}

/// Rebuilds what an event changed from the log and the snapshot store.
#[derive(Debug, Clone)]
pub struct DiffReconstructor {
    log: AuditLog,
    snapshots: SnapshotStore,
}

impl DiffReconstructor {
    pub fn new(log: AuditLog, snapshots: SnapshotStore) -> Self {
        Self { log, snapshots }
    }

    pub fn open(data_root: &Path, project_path: &Path) -> anyhow::Result<Self> {
        let layout = ProjectLayout::new(data_root, project_path);
        Ok(Self::new(
            AuditLog::for_layout(&layout)?,
            SnapshotStore::for_layout(&layout),
        ))
    }

    /// Details for `event_id`, or `None` if the log has no such event.
    pub fn reconstruct(&self, event_id: &str) -> anyhow::Result<Option<ChangeDetails>> {
        match self.log.stream()?.find(|e| e.id == event_id) {
            Some(event) => Ok(Some(self.details(&event)?)),
            None => Ok(None),
        }
    }

    /// Details for an event already read from the log.
    ///
    /// Missing snapshot files are treated as empty sides rather than errors.
    /// An empty "after" side shows the "before" content instead.
    pub fn details(&self, event: &ChangeEvent) -> anyhow::Result<ChangeDetails> {
        let after = match event.snapshot_id() {
            Some(id) => self.snapshots.get(id)?,
            None => None,
        };
        let before = match event.previous_snapshot_id() {
            Some(id) => self.snapshots.get(id)?,
            None => None,
        };

        let patch = match (event.kind(), &before, &after) {
            (ChangeKind::Modified, Some(old), Some(new)) => Some(structured_patch(
                &event.path,
                &event.path,
                old,
                new,
                CONTEXT_LINES,
            )),
            _ => None,
        };

        Ok(ChangeDetails {
            kind: event.kind(),
            content: after.filter(|s| !s.is_empty()).or(before).unwrap_or_default(),
            patch,
        })
    }
}
