pub mod subprocess;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{OwnerConfig, OwnerMode};
use crate::event::{ChangeEvent, ChangeKind};

pub use subprocess::{OwnerCommand, SubprocessResolver};

/// Looks up the account that owns a file.
///
/// Resolution never fails from the caller's point of view: any problem
/// (missing file, permission error, dead helper process) yields the
/// configured default identity.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn resolve(&self, path: &Path) -> String;

    fn default_identity(&self) -> &str;
}

/// Resolver for platforms without meaningful ownership: always the default identity.
#[derive(Debug, Clone)]
pub struct NoopResolver {
    default_identity: String,
}

impl NoopResolver {
    pub fn new(default_identity: impl Into<String>) -> Self {
        Self {
            default_identity: default_identity.into(),
        }
    }
}

#[async_trait]
impl OwnerResolver for NoopResolver {
    async fn resolve(&self, _path: &Path) -> String {
        self.default_identity.clone()
    }

    fn default_identity(&self) -> &str {
        &self.default_identity
    }
}

/// Author of a change.
///
/// Deleted files are not queried; the author is carried over from the
/// path's previous event, or the default identity if there is none.
pub async fn attribute(
    resolver: &dyn OwnerResolver,
    path: &Path,
    kind: ChangeKind,
    prior: Option<&ChangeEvent>,
) -> String {
    match kind {
        ChangeKind::Deleted => prior
            .map(|event| event.user.clone())
            .unwrap_or_else(|| resolver.default_identity().to_string()),
        ChangeKind::Created | ChangeKind::Modified => resolver.resolve(path).await,
    }
}

/// Identity of the user running this process.
pub fn process_identity() -> String {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Build the resolver selected by configuration. Must run inside a tokio runtime.
pub fn build_resolver(config: &OwnerConfig) -> Arc<dyn OwnerResolver> {
    let default_identity = config
        .default_identity
        .clone()
        .unwrap_or_else(process_identity);

    let command = match config.mode {
        OwnerMode::None => None,
        OwnerMode::Auto | OwnerMode::Subprocess => OwnerCommand::platform_default(),
    };

    match command {
        Some(command) => {
            tracing::debug!(program = %command.program, "owner lookups via helper process");
            Arc::new(SubprocessResolver::spawn(
                command,
                default_identity,
                Duration::from_millis(config.request_timeout_ms),
                Duration::from_millis(config.restart_delay_ms),
            ))
        }
        None => Arc::new(NoopResolver::new(default_identity)),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::event::{Change, now};

    #[tokio::test]
    async fn test_noop_resolver_returns_default() {
        let resolver = NoopResolver::new("svc");
        assert_eq!(resolver.resolve(Path::new("/any")).await, "svc");
    }

    #[tokio::test]
    async fn test_deleted_copies_prior_author() {
        let resolver = NoopResolver::new("svc");
        let prior = ChangeEvent {
            id: "e1".into(),
            change: Change::Created { snapshot_id: None },
            path: "a.txt".into(),
            timestamp: now(),
            user: "alice".into(),
            project_path: PathBuf::from("/p"),
        };
        let author =
            attribute(&resolver, Path::new("/p/a.txt"), ChangeKind::Deleted, Some(&prior)).await;
        assert_eq!(author, "alice");

        let author = attribute(&resolver, Path::new("/p/a.txt"), ChangeKind::Deleted, None).await;
        assert_eq!(author, "svc");
    }

    #[tokio::test]
    async fn test_mode_none_builds_noop() {
        let config = OwnerConfig {
            mode: OwnerMode::None,
            default_identity: Some("fallback".into()),
            ..OwnerConfig::default()
        };
        let resolver = build_resolver(&config);
        assert_eq!(resolver.default_identity(), "fallback");
        assert_eq!(resolver.resolve(Path::new("/nowhere")).await, "fallback");
    }
}
