use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::AuditConfig;
use crate::error::StartupError;
use crate::host::HostSink;
use crate::owner::OwnerResolver;
use crate::pipeline::ProjectWriter;
use crate::project::{Project, ProjectLayout};
use crate::walker::PathFilter;
use crate::watcher::{WatchOptions, WatcherHandle, start_watcher};

const SOURCE: &str = "registry";

/// Everything running on behalf of one watched project.
struct ProjectContext {
    project: Project,
    watcher: WatcherHandle,
    pipeline: JoinHandle<()>,
}

/// The set of actively watched projects, keyed by root path.
pub struct ProjectRegistry {
    data_root: PathBuf,
    config: AuditConfig,
    resolver: Arc<dyn OwnerResolver>,
    host: HostSink,
    contexts: HashMap<PathBuf, ProjectContext>,
}

impl ProjectRegistry {
    pub fn new(
        data_root: impl Into<PathBuf>,
        config: AuditConfig,
        resolver: Arc<dyn OwnerResolver>,
        host: HostSink,
    ) -> Self {
        Self {
            data_root: data_root.into(),
            config,
            resolver,
            host,
            contexts: HashMap::new(),
        }
    }

    /// Begin auditing `project`. Starting a project that is already watched is a no-op.
    ///
    /// Must run inside a tokio runtime.
    pub fn start(&mut self, project: Project) -> Result<(), StartupError> {
        if self.contexts.contains_key(&project.path) {
            return Ok(());
        }
        if !project.path.is_dir() {
            return Err(StartupError::ProjectRoot(project.path));
        }

        let layout = ProjectLayout::new(&self.data_root, &project.path);
        let writer = ProjectWriter::open(&layout, Arc::clone(&self.resolver), self.host.clone())
            .map_err(|err| StartupError::AuditLog {
                path: layout.log_path(),
                source: err.into(),
            })?;

        let options = WatchOptions {
            stability_threshold: self.config.stability_threshold(),
            filter: PathFilter::new(&project.path, &self.config, Some(&self.data_root)),
            host: self.host.clone(),
        };
        let (watcher, rx) =
            start_watcher(&project.path, options).map_err(|source| StartupError::Watch {
                path: project.path.clone(),
                source,
            })?;
        let pipeline = tokio::spawn(writer.run(rx));

        self.host.info(
            SOURCE,
            format!("watching {} ({})", project.name, project.path.display()),
        );
        self.contexts.insert(
            project.path.clone(),
            ProjectContext {
                project,
                watcher,
                pipeline,
            },
        );
        Ok(())
    }

    /// Stop auditing the project at `path`. Its recorded data is kept.
    ///
    /// Changes already handed to the pipeline are persisted before this returns.
    pub async fn stop(&mut self, path: &Path) -> bool {
        let Some(context) = self.contexts.remove(path) else {
            return false;
        };
        context.watcher.stop().await;
        if let Err(err) = context.pipeline.await {
            tracing::error!(project = %path.display(), error = %err, "pipeline task failed");
        }
        self.host.info(
            SOURCE,
            format!("stopped watching {}", context.project.path.display()),
        );
        true
    }

    /// Stop the project if it is watched, then delete its log and snapshots.
    pub async fn purge(&mut self, path: &Path) -> anyhow::Result<bool> {
        self.stop(path).await;
        purge_project_data(&self.data_root, path)
    }

    pub async fn shutdown(&mut self) {
        let paths: Vec<PathBuf> = self.contexts.keys().cloned().collect();
        for path in paths {
            self.stop(&path).await;
        }
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.contexts.contains_key(path)
    }

    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.contexts.values().map(|c| &c.project)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Delete everything recorded for a project. Returns false if nothing was stored.
pub fn purge_project_data(data_root: &Path, project_path: &Path) -> anyhow::Result<bool> {
    let layout = ProjectLayout::new(data_root, project_path);
    match std::fs::remove_dir_all(layout.data_dir()) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("failed to remove {}", layout.data_dir().display()))),
    }
}
