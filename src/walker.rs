use std::path::{Path, PathBuf};

use crate::config::AuditConfig;

/// Directory names that are never audited, wherever they appear in a project.
pub const EXCLUDED_DIRS: &[&str] = &["node_modules", "dist", "build", "target"];

/// Decides which paths under a project root are audited.
///
/// Shared by the initial walk and the watcher so both see the same tree.
/// Only components below the project root are inspected, so a project that
/// itself lives under a hidden directory is still audited.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    patterns: Vec<glob::Pattern>,
    data_root: Option<PathBuf>,
}

impl PathFilter {
    /// `data_root` is excluded too, so a data directory inside a project
    /// never records its own writes.
    pub fn new(root: &Path, config: &AuditConfig, data_root: Option<&Path>) -> Self {
        let patterns = config
            .exclude
            .iter()
            .flatten()
            .filter_map(|raw| match glob::Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    tracing::warn!(pattern = %raw, error = %err, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();
        Self {
            root: root.to_path_buf(),
            patterns,
            data_root: data_root.map(Path::to_path_buf),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true if `path` (absolute, under the root) must not be audited.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if let Some(data_root) = &self.data_root
            && path.starts_with(data_root)
        {
            return true;
        }

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if relative.components().any(|c| {
            c.as_os_str()
                .to_str()
                .map(|s| s.starts_with('.') || EXCLUDED_DIRS.contains(&s))
                .unwrap_or(false)
        }) {
            return true;
        }

        self.is_excluded_by_config(path, relative)
    }

    /// Returns true if `path` matches any exclusion pattern from config.
    fn is_excluded_by_config(&self, path: &Path, relative: &Path) -> bool {
        let path_str = path.to_string_lossy();
        let relative_str = relative.to_string_lossy();

        for pattern in &self.patterns {
            if pattern.matches(&path_str) || pattern.matches(&relative_str) {
                return true;
            }
            // Also check if any component matches the pattern directly.
            for component in relative.components() {
                if let Some(s) = component.as_os_str().to_str()
                    && pattern.matches(s)
                {
                    return true;
                }
            }
        }

        false
    }
}

/// Walk a project directory and collect every audited file.
///
/// Hidden entries, build output directories, and configured exclusions are
/// pruned during the walk. Ignore files are not consulted: an audit covers
/// ignored files too.
pub fn walk_project(filter: &PathFilter) -> Vec<PathBuf> {
    let prune = filter.clone();
    let walker = ignore::WalkBuilder::new(filter.root())
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| !prune.is_excluded(entry.path()))
        .build();

    let mut files = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };

        if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            files.push(entry.into_path());
        }
    }

    files
}
