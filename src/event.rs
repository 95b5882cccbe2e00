use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three kinds of change the audit trail records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Created, ChangeKind::Modified, ChangeKind::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "CREATED",
            ChangeKind::Modified => "MODIFIED",
            ChangeKind::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload of a [`ChangeEvent`].
///
/// Each variant carries only the snapshot references it can legitimately
/// have: a creation has no "before", a deletion has no "after".
/// On disk the variant is the `type` field of the flattened event object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE", rename_all_fields = "camelCase")]
pub enum Change {
    Created {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot_id: Option<String>,
    },
    Modified {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_snapshot_id: Option<String>,
    },
    Deleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_snapshot_id: Option<String>,
    },
}

/// One recorded create/modify/delete occurrence. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: String,
    #[serde(flatten)]
    pub change: Change,
    /// Project-relative path, OS separators.
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub project_path: PathBuf,
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self.change {
            Change::Created { .. } => ChangeKind::Created,
            Change::Modified { .. } => ChangeKind::Modified,
            Change::Deleted { .. } => ChangeKind::Deleted,
        }
    }

    /// Snapshot of the content after the change, if one was captured.
    pub fn snapshot_id(&self) -> Option<&str> {
        match &self.change {
            Change::Created { snapshot_id } | Change::Modified { snapshot_id, .. } => {
                snapshot_id.as_deref()
            }
            Change::Deleted { .. } => None,
        }
    }

    /// Snapshot of the content before the change, carried from the prior event.
    pub fn previous_snapshot_id(&self) -> Option<&str> {
        match &self.change {
            Change::Modified {
                previous_snapshot_id,
                ..
            }
            | Change::Deleted {
                previous_snapshot_id,
            } => previous_snapshot_id.as_deref(),
            Change::Created { .. } => None,
        }
    }
}

/// Generate an event id: `evt-<unix millis>-<8 hex chars>`.
///
/// The random suffix keeps ids distinct within one millisecond; ids sort
/// roughly by creation time.
pub fn new_event_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("evt-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// Current instant at millisecond precision, the resolution stored on disk.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
