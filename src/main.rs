use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use file_audit::audit_log::{AuditLog, MigrationOutcome};
use file_audit::cli::{Cli, Commands};
use file_audit::config::{AuditConfig, EnvConfig, LogConfig};
use file_audit::daemon;
use file_audit::logging::init_logging;
use file_audit::output::{format_details, format_events, format_query_result};
use file_audit::project::ProjectLayout;
use file_audit::query::{DiffReconstructor, Page, QueryEngine};
use file_audit::registry::purge_project_data;
use file_audit::{owner, owner::OwnerResolver};

/// One-shot commands only log problems unless `RUST_LOG` says otherwise.
fn quiet_logging() -> Result<()> {
    init_logging(&LogConfig {
        level: "warn".to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            data,
            projects,
            projects_json,
        } => {
            let config = AuditConfig::load(&data.data_dir);
            init_logging(&config.log)?;

            let env = if projects.is_empty() {
                EnvConfig::from_parts(Some(data.data_dir), projects_json.as_deref())?
            } else {
                EnvConfig::from_paths(Some(data.data_dir), projects)?
            };
            daemon::run(env, config, daemon::shutdown_signal()).await?;
        }

        Commands::Query {
            data,
            project,
            filter,
            page,
            page_size,
            format,
        } => {
            quiet_logging()?;
            let engine = QueryEngine::open(&data.data_dir, &project)?;
            let page = Page {
                number: page,
                size: page_size,
            };
            let result = engine.query(&filter.to_filter(), page)?;
            print!("{}", format_query_result(&result, page, &format));
        }

        Commands::Export {
            data,
            project,
            filter,
            format,
        } => {
            quiet_logging()?;
            let engine = QueryEngine::open(&data.data_dir, &project)?;
            let events = engine.export(&filter.to_filter())?;
            print!("{}", format_events(&events, &format));
        }

        Commands::Show {
            data,
            project,
            event_id,
            format,
        } => {
            quiet_logging()?;
            let engine = QueryEngine::open(&data.data_dir, &project)?;
            let event = engine
                .find(&event_id)?
                .with_context(|| format!("no event {event_id} in {}", project.display()))?;
            let details = DiffReconstructor::open(&data.data_dir, &project)?.details(&event)?;
            print!("{}", format_details(&event, &details, &format));
        }

        Commands::Migrate { data, project } => {
            quiet_logging()?;
            let layout = ProjectLayout::new(&data.data_dir, &project);
            let log = AuditLog::for_layout(&layout)?;
            match log.migration() {
                MigrationOutcome::NotNeeded => {
                    println!("{}: nothing to migrate", log.path().display());
                }
                MigrationOutcome::Migrated { events, backup } => {
                    println!(
                        "{}: migrated {events} event(s); original kept at {}",
                        log.path().display(),
                        backup.display()
                    );
                }
                MigrationOutcome::Quarantined { corrupt, reason } => {
                    anyhow::bail!(
                        "{}: legacy log unreadable ({reason}); moved to {}",
                        log.path().display(),
                        corrupt.display()
                    );
                }
            }
        }

        Commands::Purge { data, project } => {
            quiet_logging()?;
            if purge_project_data(&data.data_dir, &project)? {
                println!("removed recorded history for {}", project.display());
            } else {
                println!("no recorded history for {}", project.display());
            }
        }

        Commands::Whoami { data, file } => {
            quiet_logging()?;
            let config = AuditConfig::load(&data.data_dir);
            let resolver = owner::build_resolver(&config.owner);
            match file {
                Some(file) => println!("{}", resolver.resolve(&absolute(&file)?).await),
                None => println!("{}", resolver.default_identity()),
            }
        }
    }

    Ok(())
}

fn absolute(path: &Path) -> Result<std::path::PathBuf> {
    std::path::absolute(path).with_context(|| format!("cannot resolve {}", path.display()))
}
