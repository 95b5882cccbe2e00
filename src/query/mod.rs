pub mod diff;
pub mod filter;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::audit_log::AuditLog;
use crate::event::{ChangeEvent, ChangeKind};
use crate::project::ProjectLayout;

pub use diff::{ChangeDetails, DiffReconstructor, Hunk, StructuredPatch};
pub use filter::{DateRange, QueryFilter};

use filter::EventMatcher;

/// Page size used when the caller does not choose one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// 1-based page selection. Page 0 or size 0 selects nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Event counts per kind. Every kind is always present in the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeCounts {
    #[serde(rename = "CREATED")]
    pub created: usize,
    #[serde(rename = "MODIFIED")]
    pub modified: usize,
    #[serde(rename = "DELETED")]
    pub deleted: usize,
}

impl TypeCounts {
    fn record(&mut self, kind: ChangeKind) {
        *self.slot(kind) += 1;
    }

    fn slot(&mut self, kind: ChangeKind) -> &mut usize {
        match kind {
            ChangeKind::Created => &mut self.created,
            ChangeKind::Modified => &mut self.modified,
            ChangeKind::Deleted => &mut self.deleted,
        }
    }

    pub fn get(&self, kind: ChangeKind) -> usize {
        match kind {
            ChangeKind::Created => self.created,
            ChangeKind::Modified => self.modified,
            ChangeKind::Deleted => self.deleted,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.modified + self.deleted
    }
}

/// One page of matching events plus aggregates over the whole match set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Newest first.
    pub items: Vec<ChangeEvent>,
    pub total_count: usize,
    pub type_counts: TypeCounts,
    pub author_counts: BTreeMap<String, usize>,
}

/// Read-only access to one project's history.
///
/// Every call streams the log from disk, so it is safe to use while the
/// daemon is appending; it sees every line completed before the call.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    log: AuditLog,
    project_path: PathBuf,
}

impl QueryEngine {
    pub fn new(log: AuditLog, project_path: impl Into<PathBuf>) -> Self {
        Self {
            log,
            project_path: project_path.into(),
        }
    }

    pub fn open(data_root: &Path, project_path: &Path) -> anyhow::Result<Self> {
        let layout = ProjectLayout::new(data_root, project_path);
        Ok(Self::new(AuditLog::for_layout(&layout)?, project_path))
    }

    pub fn log(&self) -> &AuditLog {
        &self.log
    }

    /// Filter, aggregate, sort newest-first, and paginate.
    pub fn query(&self, filter: &QueryFilter, page: Page) -> anyhow::Result<QueryResult> {
        let matcher = EventMatcher::new(filter, &self.project_path);
        let mut type_counts = TypeCounts::default();
        let mut author_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut matched = Vec::new();

        for event in self.log.stream()?.filter(|e| matcher.matches(e)) {
            type_counts.record(event.kind());
            *author_counts.entry(event.user.clone()).or_default() += 1;
            matched.push(event);
        }

        // Among equal timestamps the later-written event comes first.
        matched.reverse();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total_count = matched.len();
        let items = if page.number == 0 || page.size == 0 {
            Vec::new()
        } else {
            let skip = (page.number - 1).saturating_mul(page.size);
            matched.into_iter().skip(skip).take(page.size).collect()
        };

        Ok(QueryResult {
            items,
            total_count,
            type_counts,
            author_counts,
        })
    }

    /// Every matching event, oldest first, unpaginated.
    pub fn export(&self, filter: &QueryFilter) -> anyhow::Result<Vec<ChangeEvent>> {
        let matcher = EventMatcher::new(filter, &self.project_path);
        let mut matched: Vec<ChangeEvent> =
            self.log.stream()?.filter(|e| matcher.matches(e)).collect();
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(matched)
    }

    pub fn find(&self, event_id: &str) -> anyhow::Result<Option<ChangeEvent>> {
        Ok(self.log.stream()?.find(|e| e.id == event_id))
    }
}
