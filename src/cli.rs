use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{DATA_ROOT_ENV, PROJECTS_ENV};
use crate::query::{DEFAULT_PAGE_SIZE, DateRange, QueryFilter};

/// Audit trail for project directories.
///
/// file-audit watches project trees, records every create, modify and delete
/// with the author and a snapshot of the content, and answers history
/// queries and diffs from the recorded log.
#[derive(Parser, Debug)]
#[command(
    name = "file-audit",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for query results.
#[derive(Clone, Debug, ValueEnum, Default)]
pub enum OutputFormat {
    /// Compact one-line-per-result format (default).
    #[default]
    Compact,
    /// Human-readable columnar table with optional ANSI color when stdout is a terminal.
    Table,
    /// Structured JSON suitable for programmatic consumption.
    Json,
}

/// Location of recorded data.
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Data root holding `projects/<id>/` directories.
    #[arg(long, env = DATA_ROOT_ENV)]
    pub data_dir: PathBuf,
}

/// Event selection shared by `query` and `export`.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// First day to include (YYYY-MM-DD, local time).
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last day to include (YYYY-MM-DD, local time).
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Only changes at or below this file or directory.
    #[arg(long)]
    pub focus: Option<PathBuf>,

    /// Case-insensitive substring of the path or user.
    #[arg(long)]
    pub search: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> QueryFilter {
        QueryFilter {
            date_range: DateRange::from_bounds(self.from, self.to),
            focused_path: self.focus.clone(),
            search_term: self.search.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch projects and record changes until interrupted.
    ///
    /// Change notifications and diagnostics are written to stdout as JSON lines;
    /// logs go to stderr. Exits immediately when no projects are configured.
    Run {
        #[command(flatten)]
        data: DataArgs,

        /// Project root to watch (repeatable). Replaces the projects listed in the environment.
        #[arg(long = "project")]
        projects: Vec<PathBuf>,

        /// JSON list of `{"path", "name"}` projects.
        #[arg(long, env = PROJECTS_ENV, hide_env_values = true)]
        projects_json: Option<String>,
    },

    /// Show one page of a project's history, newest first, with totals.
    Query {
        #[command(flatten)]
        data: DataArgs,

        /// Project root whose history to read.
        project: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Events per page.
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Dump every matching event, oldest first.
    Export {
        #[command(flatten)]
        data: DataArgs,

        /// Project root whose history to read.
        project: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Output format (compact is one JSON object per line).
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Show what one event changed: a diff for modifications, the content otherwise.
    Show {
        #[command(flatten)]
        data: DataArgs,

        /// Project root the event belongs to.
        project: PathBuf,

        /// Event id (`evt-...`).
        event_id: String,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Convert a project's legacy whole-array log to one event per line.
    Migrate {
        #[command(flatten)]
        data: DataArgs,

        /// Project root whose log to convert.
        project: PathBuf,
    },

    /// Delete all recorded history and snapshots for a project.
    Purge {
        #[command(flatten)]
        data: DataArgs,

        /// Project root whose data to delete.
        project: PathBuf,
    },

    /// Print the identity the daemon records: the owner of FILE, or the default identity.
    Whoami {
        #[command(flatten)]
        data: DataArgs,

        /// File to look up.
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_args_parse() {
        let cli = Cli::try_parse_from([
            "file-audit",
            "query",
            "--data-dir",
            "/data",
            "/proj",
            "--from",
            "2024-03-01",
            "--search",
            "alice",
            "--page-size",
            "10",
            "--format",
            "json",
        ])
        .unwrap();
        let Commands::Query {
            data,
            project,
            filter,
            page,
            page_size,
            format,
        } = cli.command
        else {
            panic!("expected query");
        };
        assert_eq!(data.data_dir, PathBuf::from("/data"));
        assert_eq!(project, PathBuf::from("/proj"));
        assert_eq!(page, 1);
        assert_eq!(page_size, 10);
        assert!(matches!(format, OutputFormat::Json));
        let filter = filter.to_filter();
        assert!(filter.date_range.is_some());
        assert_eq!(filter.search_term.as_deref(), Some("alice"));
    }

    #[test]
    fn test_bad_date_is_rejected() {
        let result = Cli::try_parse_from([
            "file-audit",
            "export",
            "--data-dir",
            "/data",
            "/proj",
            "--from",
            "yesterday",
        ]);
        assert!(result.is_err());
    }
}
