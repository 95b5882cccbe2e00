use std::path::PathBuf;

/// Reasons the daemon or one of its projects could not start.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("{0} is not set")]
    MissingEnv(&'static str),

    #[error("{var} is not a valid project list: {source}")]
    InvalidProjects {
        var: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("project root {} does not exist or is not a directory", .0.display())]
    ProjectRoot(PathBuf),

    #[error("failed to open audit log {}: {source}", path.display())]
    AuditLog {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}
