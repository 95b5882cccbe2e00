use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Directory under the data root holding one subdirectory per project.
pub const PROJECTS_DIR: &str = "projects";
/// Event log file name within a project's data directory.
pub const LOG_FILE: &str = "change_log.json";
/// Snapshot subdirectory within a project's data directory.
pub const SNAPSHOTS_DIR: &str = "snapshots";
/// Extension of every snapshot file.
pub const SNAPSHOT_EXT: &str = "txt";

/// A watched project root, as described by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub path: PathBuf,
    pub name: String,
}

impl Project {
    /// Build a project whose display name is the root's final path component.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { path, name }
    }
}

/// Stable project id: lowercase hex SHA-256 of the absolute root path string.
pub fn project_id(project_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// On-disk locations owned by one project: `<root>/projects/<id>/...`.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    project_path: PathBuf,
    data_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(data_root: &Path, project_path: &Path) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
            data_dir: data_root.join(PROJECTS_DIR).join(project_id(project_path)),
        }
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOTS_DIR)
    }

    /// Create the data and snapshot directories if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.snapshots_dir())
    }
}
