use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::event::{ChangeEvent, ChangeKind};

/// Latest non-deleted event per project-relative path.
///
/// Held only in memory and rebuilt by replaying the audit log. Its size is
/// the number of distinct live paths, never the number of events.
#[derive(Debug, Default)]
pub struct StateIndex {
    entries: HashMap<String, ChangeEvent>,
}

impl StateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay events from a log in any order.
    ///
    /// Migrated legacy logs are newest first, so an event only takes effect
    /// if it is not older than the last one seen for its path (deletions
    /// included). Equal timestamps fall back to file order.
    pub fn rebuild(events: impl IntoIterator<Item = ChangeEvent>) -> Self {
        let mut index = Self::new();
        let mut newest: HashMap<String, DateTime<Utc>> = HashMap::new();
        for event in events {
            if newest.get(&event.path).is_some_and(|seen| *seen > event.timestamp) {
                continue;
            }
            newest.insert(event.path.clone(), event.timestamp);
            index.apply(event);
        }
        index
    }

    /// Fold one persisted event into the index.
    pub fn apply(&mut self, event: ChangeEvent) {
        match event.kind() {
            ChangeKind::Deleted => {
                self.entries.remove(&event.path);
            }
            ChangeKind::Created | ChangeKind::Modified => {
                self.entries.insert(event.path.clone(), event);
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&ChangeEvent> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::event::{Change, now};

    fn event(id: &str, change: Change, path: &str) -> ChangeEvent {
        ChangeEvent {
            id: id.into(),
            change,
            path: path.into(),
            timestamp: now(),
            user: "u".into(),
            project_path: PathBuf::from("/p"),
        }
    }

    fn created(id: &str, path: &str) -> ChangeEvent {
        event(id, Change::Created { snapshot_id: Some(id.into()) }, path)
    }

    fn modified(id: &str, path: &str) -> ChangeEvent {
        event(
            id,
            Change::Modified {
                snapshot_id: Some(id.into()),
                previous_snapshot_id: None,
            },
            path,
        )
    }

    fn deleted(id: &str, path: &str) -> ChangeEvent {
        event(id, Change::Deleted { previous_snapshot_id: None }, path)
    }

    #[test]
    fn test_latest_event_wins() {
        let index = StateIndex::rebuild([created("1", "a"), modified("2", "a"), modified("3", "a")]);
        assert_eq!(index.get("a").map(|e| e.id.as_str()), Some("3"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_delete_clears_path() {
        let index = StateIndex::rebuild([created("1", "a"), deleted("2", "a")]);
        assert!(index.get("a").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_size_bounded_by_distinct_live_paths() {
        // 9 events over 3 distinct paths; "c" ends deleted.
        let events = vec![
            created("1", "a"),
            created("2", "b"),
            created("3", "c"),
            modified("4", "a"),
            modified("5", "b"),
            modified("6", "a"),
            deleted("7", "c"),
            modified("8", "b"),
            modified("9", "a"),
        ];
        let index = StateIndex::rebuild(events);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("a").map(|e| e.id.as_str()), Some("9"));
        assert_eq!(index.get("b").map(|e| e.id.as_str()), Some("8"));
    }

    #[test]
    fn test_newest_first_replay_keeps_latest() {
        let at = |secs: i64| DateTime::from_timestamp(secs, 0).unwrap();
        let stamped = |mut e: ChangeEvent, secs: i64| {
            e.timestamp = at(secs);
            e
        };
        let events = vec![
            stamped(modified("3", "a"), 30),
            stamped(modified("2", "a"), 20),
            stamped(created("1", "a"), 10),
            stamped(deleted("d2", "gone"), 15),
            stamped(created("d1", "gone"), 5),
        ];
        let index = StateIndex::rebuild(events);
        assert_eq!(index.get("a").map(|e| e.id.as_str()), Some("3"));
        assert!(index.get("gone").is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_recreate_after_delete() {
        let index = StateIndex::rebuild([created("1", "a"), deleted("2", "a"), created("3", "a")]);
        assert_eq!(index.get("a").map(|e| e.id.as_str()), Some("3"));
    }
}
