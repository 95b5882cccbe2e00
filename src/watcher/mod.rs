pub mod event;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, DebouncedEventKind, new_debouncer};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;

use crate::host::HostSink;
use crate::walker::{PathFilter, walk_project};

pub use event::WatchEvent;

const SOURCE: &str = "watcher";

/// Handle to a running watcher. Keeps the debouncer alive (dropping stops watching).
pub struct WatcherHandle {
    /// Keep alive: dropping the debouncer stops the OS watcher.
    debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    /// The bridge task forwarding events from std channel to tokio channel.
    bridge_task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop watching and wait for the bridge to finish forwarding.
    ///
    /// The event receiver yields whatever was already classified and then ends.
    pub async fn stop(self) {
        drop(self.debouncer);
        let _ = self.bridge_task.await;
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// How long a path must be quiet before its change is reported.
    pub stability_threshold: Duration,
    pub filter: PathFilter,
    pub host: HostSink,
}

/// Start a debounced file watcher on `watch_root`.
///
/// Returns a `WatcherHandle` (must be kept alive) and a tokio mpsc receiver
/// that yields classified `WatchEvent`s.
///
/// Files present at start are learned by a walk on the bridge thread and
/// produce no events. After that, every settled path is compared with the
/// known tree to decide between Created, Modified, and Deleted.
pub fn start_watcher(
    watch_root: &Path,
    options: WatchOptions,
) -> notify::Result<(WatcherHandle, tokio_mpsc::Receiver<WatchEvent>)> {
    let (std_tx, std_rx) = std::sync::mpsc::channel::<DebounceEventResult>();

    let mut debouncer = new_debouncer(options.stability_threshold, move |res| {
        let _ = std_tx.send(res);
    })?;
    debouncer
        .watcher()
        .watch(watch_root, RecursiveMode::Recursive)?;

    // Tokio channel for classified events
    let (tokio_tx, tokio_rx) = tokio_mpsc::channel::<WatchEvent>(256);

    // Bridge: spawn_blocking to receive from std channel, classify, forward to tokio
    let WatchOptions { filter, host, .. } = options;
    let bridge_task = tokio::task::spawn_blocking(move || {
        let mut known = KnownFiles::seed(&filter);
        tracing::debug!(root = %filter.root().display(), files = known.len(), "watch baseline ready");

        while let Ok(result) = std_rx.recv() {
            match result {
                Ok(events) => {
                    for debounced_event in events {
                        if matches!(debounced_event.kind, DebouncedEventKind::AnyContinuous) {
                            continue;
                        }
                        if filter.is_excluded(&debounced_event.path) {
                            continue;
                        }
                        for watch_event in known.classify(&debounced_event.path, &filter) {
                            if tokio_tx.blocking_send(watch_event).is_err() {
                                return; // receiver dropped, shutdown
                            }
                        }
                    }
                }
                Err(err) => {
                    host.warn(SOURCE, format!("watch error under {}: {err:?}", filter.root().display()));
                }
            }
        }
    });

    Ok((
        WatcherHandle {
            debouncer,
            bridge_task,
        },
        tokio_rx,
    ))
}

/// Size and modification time, enough to tell a real write from a touch-free event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

/// The files the watcher believes exist, with their last seen stamps.
#[derive(Debug, Default)]
struct KnownFiles {
    stamps: HashMap<PathBuf, FileStamp>,
}

impl KnownFiles {
    fn seed(filter: &PathFilter) -> Self {
        let mut known = Self::default();
        for path in walk_project(filter) {
            if let Ok(meta) = std::fs::metadata(&path) {
                known.stamps.insert(path, FileStamp::of(&meta));
            }
        }
        known
    }

    fn len(&self) -> usize {
        self.stamps.len()
    }

    /// Turn one settled path into zero or more file events.
    fn classify(&mut self, path: &Path, filter: &PathFilter) -> Vec<WatchEvent> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => self.discover(path, filter),
            Ok(meta) if meta.is_file() => {
                let stamp = FileStamp::of(&meta);
                match self.stamps.insert(path.to_path_buf(), stamp) {
                    None => vec![WatchEvent::Created(path.to_path_buf())],
                    Some(previous) if previous != stamp => {
                        vec![WatchEvent::Modified(path.to_path_buf())]
                    }
                    Some(_) => Vec::new(),
                }
            }
            Ok(_) => Vec::new(),
            Err(_) => self.forget(path),
        }
    }

    /// Files under a directory that appeared in one piece (e.g. moved in).
    fn discover(&mut self, dir: &Path, filter: &PathFilter) -> Vec<WatchEvent> {
        let mut created = Vec::new();
        for path in walk_project(filter) {
            if !path.starts_with(dir) || self.stamps.contains_key(&path) {
                continue;
            }
            if let Ok(meta) = std::fs::metadata(&path) {
                self.stamps.insert(path.clone(), FileStamp::of(&meta));
                created.push(WatchEvent::Created(path));
            }
        }
        created
    }

    /// A path that no longer exists: the file itself, or everything known beneath it.
    fn forget(&mut self, path: &Path) -> Vec<WatchEvent> {
        if self.stamps.remove(path).is_some() {
            return vec![WatchEvent::Deleted(path.to_path_buf())];
        }
        let mut gone: Vec<PathBuf> = self
            .stamps
            .keys()
            .filter(|known| known.starts_with(path))
            .cloned()
            .collect();
        gone.sort();
        for known in &gone {
            self.stamps.remove(known);
        }
        gone.into_iter().map(WatchEvent::Deleted).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::AuditConfig;

    fn filter(root: &Path) -> PathFilter {
        PathFilter::new(root, &AuditConfig::default(), None)
    }

    #[test]
    fn test_classify_against_known_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("old.txt"), "old").unwrap();
        let filter = filter(root);
        let mut known = KnownFiles::seed(&filter);
        assert_eq!(known.len(), 1);

        // Unchanged known file: no event.
        assert!(known.classify(&root.join("old.txt"), &filter).is_empty());

        fs::write(root.join("new.txt"), "n").unwrap();
        assert_eq!(
            known.classify(&root.join("new.txt"), &filter),
            vec![WatchEvent::Created(root.join("new.txt"))]
        );

        fs::write(root.join("old.txt"), "old and longer").unwrap();
        assert_eq!(
            known.classify(&root.join("old.txt"), &filter),
            vec![WatchEvent::Modified(root.join("old.txt"))]
        );

        fs::remove_file(root.join("old.txt")).unwrap();
        assert_eq!(
            known.classify(&root.join("old.txt"), &filter),
            vec![WatchEvent::Deleted(root.join("old.txt"))]
        );

        // Unknown and missing: nothing to report.
        assert!(known.classify(&root.join("never.txt"), &filter).is_empty());
    }

    #[test]
    fn test_removed_directory_deletes_known_children() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub/inner")).unwrap();
        fs::write(root.join("sub/a.txt"), "a").unwrap();
        fs::write(root.join("sub/inner/b.txt"), "b").unwrap();
        fs::write(root.join("keep.txt"), "k").unwrap();
        let filter = filter(root);
        let mut known = KnownFiles::seed(&filter);

        fs::remove_dir_all(root.join("sub")).unwrap();
        assert_eq!(
            known.classify(&root.join("sub"), &filter),
            vec![
                WatchEvent::Deleted(root.join("sub/a.txt")),
                WatchEvent::Deleted(root.join("sub/inner/b.txt")),
            ]
        );
        assert_eq!(known.len(), 1);
    }

    #[test]
    fn test_directory_moved_in_creates_its_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let filter = filter(root);
        let mut known = KnownFiles::seed(&filter);

        fs::create_dir_all(root.join("incoming")).unwrap();
        fs::write(root.join("incoming/x.txt"), "x").unwrap();
        let events = known.classify(&root.join("incoming"), &filter);
        assert_eq!(events, vec![WatchEvent::Created(root.join("incoming/x.txt"))]);

        // The file's own notification later is a no-op.
        assert!(known.classify(&root.join("incoming/x.txt"), &filter).is_empty());
    }

    async fn next_event(rx: &mut tokio_mpsc::Receiver<WatchEvent>) -> WatchEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for watch event")
            .expect("watch channel closed")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watcher_reports_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let options = WatchOptions {
            stability_threshold: Duration::from_millis(200),
            filter: filter(&root),
            host: HostSink::disconnected(),
        };
        let (handle, mut rx) = start_watcher(&root, options).unwrap();
        // Let the baseline walk finish before touching the tree.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let file = root.join("note.txt");
        fs::write(&file, "one").unwrap();
        assert_eq!(next_event(&mut rx).await, WatchEvent::Created(file.clone()));

        fs::write(&file, "one two").unwrap();
        assert_eq!(next_event(&mut rx).await, WatchEvent::Modified(file.clone()));

        fs::remove_file(&file).unwrap();
        assert_eq!(next_event(&mut rx).await, WatchEvent::Deleted(file.clone()));

        fs::write(root.join(".hidden"), "x").unwrap();
        handle.stop().await;
        assert!(rx.recv().await.is_none());
    }
}
