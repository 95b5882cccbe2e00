use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audit_log::{AuditLog, MigrationOutcome};
use crate::event::{Change, ChangeEvent, ChangeKind, new_event_id, now};
use crate::host::HostSink;
use crate::index::StateIndex;
use crate::owner::{self, OwnerResolver};
use crate::project::ProjectLayout;
use crate::snapshot::{self, SnapshotStore};
use crate::watcher::WatchEvent;

const SOURCE: &str = "pipeline";

/// Fresh ids tried when a snapshot file with the generated id already exists.
const MAX_ID_ATTEMPTS: usize = 3;

/// The only writer of one project's log, snapshots and index.
///
/// Notifications are processed strictly one after another, so the log order
/// is the order in which changes settled and the index always reflects the
/// last persisted event.
pub struct ProjectWriter {
    project_path: PathBuf,
    log: AuditLog,
    snapshots: SnapshotStore,
    index: StateIndex,
    resolver: Arc<dyn OwnerResolver>,
    host: HostSink,
}

impl ProjectWriter {
    /// Prepare the data directory, migrate a legacy log, and rebuild the index.
    pub fn open(
        layout: &ProjectLayout,
        resolver: Arc<dyn OwnerResolver>,
        host: HostSink,
    ) -> anyhow::Result<Self> {
        layout.ensure_dirs()?;
        let log = AuditLog::for_layout(layout)?;
        report_migration(&host, layout.project_path(), log.migration());

        let mut reader = log.stream()?;
        let index = StateIndex::rebuild(reader.by_ref());
        if reader.skipped() > 0 {
            host.warn(
                SOURCE,
                format!(
                    "skipped {} malformed line(s) in {}",
                    reader.skipped(),
                    log.path().display()
                ),
            );
        }
        tracing::debug!(
            project = %layout.project_path().display(),
            live_paths = index.len(),
            "state index rebuilt"
        );

        Ok(Self {
            project_path: layout.project_path().to_path_buf(),
            log,
            snapshots: SnapshotStore::for_layout(layout),
            index,
            resolver,
            host,
        })
    }

    pub fn index(&self) -> &StateIndex {
        &self.index
    }

    pub fn log(&self) -> &AuditLog {
        &self.log
    }

    /// Drain notifications until the watcher side closes the channel.
    pub async fn run(mut self, mut rx: mpsc::Receiver<WatchEvent>) {
        while let Some(notification) = rx.recv().await {
            self.process(notification).await;
        }
        tracing::debug!(project = %self.project_path.display(), "pipeline finished");
    }

    /// Take one settled change through attribution, capture, persistence,
    /// indexing and notification. Returns the persisted event, if any.
    pub async fn process(&mut self, notification: WatchEvent) -> Option<ChangeEvent> {
        let kind = notification.kind();
        let absolute = notification.path();
        let Some(path) = self.relative(absolute) else {
            tracing::debug!(path = %absolute.display(), "change outside project root ignored");
            return None;
        };
        let prior = self.index.get(&path).cloned();

        let user = owner::attribute(self.resolver.as_ref(), absolute, kind, prior.as_ref()).await;

        let content = match kind {
            ChangeKind::Deleted => None,
            ChangeKind::Created | ChangeKind::Modified => snapshot::capture(absolute).await,
        };
        if content.is_none() && kind != ChangeKind::Deleted {
            tracing::debug!(path = %absolute.display(), "content not captured");
        }

        let (id, snapshot_id) = self.store_snapshot(&path, content.as_deref()).await;
        let previous_snapshot_id = prior
            .as_ref()
            .and_then(ChangeEvent::snapshot_id)
            .map(str::to_string);
        let change = match kind {
            ChangeKind::Created => Change::Created { snapshot_id },
            ChangeKind::Modified => Change::Modified {
                snapshot_id,
                previous_snapshot_id,
            },
            ChangeKind::Deleted => Change::Deleted {
                previous_snapshot_id,
            },
        };
        let event = ChangeEvent {
            id,
            change,
            path,
            timestamp: now(),
            user,
            project_path: self.project_path.clone(),
        };

        if let Err(err) = self.log.append(&event).await {
            if let Some(snapshot_id) = event.snapshot_id() {
                self.snapshots.discard(snapshot_id).await;
            }
            self.host.error(
                SOURCE,
                format!("failed to record {} of {}: {err:#}", event.kind(), event.path),
            );
            return None;
        }

        self.index.apply(event.clone());
        self.host.emit_change(event.clone()).await;
        tracing::info!(
            kind = %event.kind(),
            path = %event.path,
            user = %event.user,
            "change recorded"
        );
        Some(event)
    }

    /// Write the snapshot under a fresh event id. Returns the id to use for the
    /// event and the snapshot id, which is absent if nothing was stored.
    async fn store_snapshot(&self, path: &str, content: Option<&str>) -> (String, Option<String>) {
        let Some(content) = content else {
            return (new_event_id(), None);
        };

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = new_event_id();
            match self.snapshots.put(&id, content).await {
                Ok(()) => return (id.clone(), Some(id)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    tracing::warn!(id = %id, "snapshot id already taken; retrying");
                }
                Err(err) => {
                    self.host.warn(
                        SOURCE,
                        format!("snapshot for {path} not stored: {err}; recording without content"),
                    );
                    return (id, None);
                }
            }
        }

        self.host.warn(
            SOURCE,
            format!("no free snapshot id for {path}; recording without content"),
        );
        (new_event_id(), None)
    }

    fn relative(&self, absolute: &Path) -> Option<String> {
        let relative = absolute.strip_prefix(&self.project_path).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(relative.to_string_lossy().into_owned())
    }
}

fn report_migration(host: &HostSink, project_path: &Path, outcome: &MigrationOutcome) {
    match outcome {
        MigrationOutcome::NotNeeded => {}
        MigrationOutcome::Migrated { events, backup } => host.info(
            SOURCE,
            format!(
                "converted legacy log for {} ({events} events); original kept at {}",
                project_path.display(),
                backup.display()
            ),
        ),
        MigrationOutcome::Quarantined { corrupt, reason } => host.error(
            SOURCE,
            format!(
                "legacy log for {} is unreadable ({reason}); moved to {}, history starts empty",
                project_path.display(),
                corrupt.display()
            ),
        ),
    }
}
