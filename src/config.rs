use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::StartupError;
use crate::project::Project;

/// File name of the optional tuning file inside the data root.
pub const CONFIG_FILE: &str = "file-audit.toml";
/// Environment variable holding the data root.
pub const DATA_ROOT_ENV: &str = "USER_DATA_PATH";
/// Environment variable holding the JSON list of watched projects.
pub const PROJECTS_ENV: &str = "WATCHED_PROJECTS";

/// Configuration loaded from `file-audit.toml` in the data root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Quiet period a file must stay unchanged before an event is recorded.
    pub stability_threshold_ms: u64,
    /// Additional path patterns to ignore (beyond hidden entries and build output).
    pub exclude: Option<Vec<String>>,
    pub owner: OwnerConfig,
    pub log: LogConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            stability_threshold_ms: 2000,
            exclude: None,
            owner: OwnerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// How file owners are looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerMode {
    /// Platform helper where one exists, otherwise the default identity.
    #[default]
    Auto,
    /// Always the default identity.
    None,
    /// Always the helper process.
    Subprocess,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OwnerConfig {
    pub mode: OwnerMode,
    /// Identity used when no owner can be determined. Defaults to the user running the process.
    pub default_identity: Option<String>,
    pub request_timeout_ms: u64,
    pub restart_delay_ms: u64,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            mode: OwnerMode::Auto,
            default_identity: None,
            request_timeout_ms: 5000,
            restart_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AuditConfig {
    /// Load configuration from `file-audit.toml` in the given data root.
    ///
    /// Returns the defaults if the file does not exist or cannot be parsed.
    /// Runs before logging is set up, so problems go straight to stderr.
    pub fn load(data_root: &Path) -> Self {
        let config_path = data_root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("warning: failed to parse {CONFIG_FILE}: {err}. Using defaults.");
                    Self::default()
                }
            },
            Err(err) => {
                eprintln!("warning: failed to read {CONFIG_FILE}: {err}. Using defaults.");
                Self::default()
            }
        }
    }

    pub fn stability_threshold(&self) -> Duration {
        Duration::from_millis(self.stability_threshold_ms)
    }
}

/// One entry of the `WATCHED_PROJECTS` list.
#[derive(Debug, Deserialize)]
struct ProjectEntry {
    path: PathBuf,
    #[serde(default)]
    name: Option<String>,
}

/// Start-up inputs supplied by the host process.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub data_root: PathBuf,
    pub projects: Vec<Project>,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, StartupError> {
        let data_root = std::env::var_os(DATA_ROOT_ENV).map(PathBuf::from);
        let projects = std::env::var(PROJECTS_ENV).ok();
        Self::from_parts(data_root, projects.as_deref())
    }

    /// Build from already-read values. Both are required; `[]` is a valid,
    /// empty project list.
    pub fn from_parts(
        data_root: Option<PathBuf>,
        projects_json: Option<&str>,
    ) -> Result<Self, StartupError> {
        let data_root = require_data_root(data_root)?;
        let raw = projects_json
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(StartupError::MissingEnv(PROJECTS_ENV))?;
        Ok(Self {
            data_root,
            projects: parse_projects(raw)?,
        })
    }

    /// Build from explicit project roots, named after their final component.
    pub fn from_paths(
        data_root: Option<PathBuf>,
        paths: impl IntoIterator<Item = PathBuf>,
    ) -> Result<Self, StartupError> {
        let data_root = require_data_root(data_root)?;
        let mut projects: Vec<Project> = Vec::new();
        for path in paths {
            if !projects.iter().any(|p| p.path == path) {
                projects.push(Project::from_path(path));
            }
        }
        Ok(Self {
            data_root,
            projects,
        })
    }
}

fn require_data_root(data_root: Option<PathBuf>) -> Result<PathBuf, StartupError> {
    data_root
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(StartupError::MissingEnv(DATA_ROOT_ENV))
}

/// Parse `[{"path": "...", "name": "..."}, ...]`. Duplicate paths are dropped.
pub fn parse_projects(raw: &str) -> Result<Vec<Project>, StartupError> {
    let entries: Vec<ProjectEntry> =
        serde_json::from_str(raw).map_err(|source| StartupError::InvalidProjects {
            var: PROJECTS_ENV,
            source,
        })?;

    let mut projects: Vec<Project> = Vec::with_capacity(entries.len());
    for entry in entries {
        if projects.iter().any(|p| p.path == entry.path) {
            continue;
        }
        let mut project = Project::from_path(entry.path);
        if let Some(name) = entry.name.filter(|n| !n.is_empty()) {
            project.name = name;
        }
        projects.push(project);
    }
    Ok(projects)
}
