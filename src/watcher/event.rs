use std::path::{Path, PathBuf};

use crate::event::ChangeKind;

/// A settled change to one file, after classification against the known tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file appeared that was not known before.
    Created(PathBuf),
    /// A known file's size or modification time changed.
    Modified(PathBuf),
    /// A known file, or every known file under a removed directory, is gone.
    Deleted(PathBuf),
}

impl WatchEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Created(_) => ChangeKind::Created,
            Self::Modified(_) => ChangeKind::Modified,
            Self::Deleted(_) => ChangeKind::Deleted,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) => p,
        }
    }
}
