use std::future::Future;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::config::{AuditConfig, EnvConfig};
use crate::host::{HostMessage, HostSink};
use crate::owner;
use crate::registry::ProjectRegistry;

/// Host channel depth; diagnostics beyond this are dropped, changes wait.
const HOST_CHANNEL_CAPACITY: usize = 1024;

/// Watch every configured project until `shutdown` resolves.
///
/// Host messages are written to stdout, one JSON object per line. A project
/// that cannot start is reported to the host and skipped; the run fails only
/// if none of them start.
pub async fn run(
    env: EnvConfig,
    config: AuditConfig,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    if env.projects.is_empty() {
        tracing::info!("no projects configured; nothing to watch");
        return Ok(());
    }

    std::fs::create_dir_all(&env.data_root)?;
    let (host, rx) = HostSink::channel(HOST_CHANNEL_CAPACITY);
    let forwarder = tokio::spawn(forward_to_stdout(rx));

    let resolver = owner::build_resolver(&config.owner);
    let mut registry = ProjectRegistry::new(&env.data_root, config, resolver, host.clone());
    for project in env.projects {
        let path = project.path.clone();
        if let Err(err) = registry.start(project) {
            tracing::error!(project = %path.display(), error = %err, "project not watched");
            host.watch_failed(&path, &err);
        }
    }

    let started = registry.len();
    if started > 0 {
        tracing::info!(projects = started, "audit daemon running");
        shutdown.await;
        tracing::info!("shutting down");
        registry.shutdown().await;
    }

    drop(registry);
    drop(host);
    let _ = forwarder.await;

    if started == 0 {
        anyhow::bail!("none of the configured projects could be watched");
    }
    Ok(())
}

async fn forward_to_stdout(mut rx: mpsc::Receiver<HostMessage>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "host message not serializable");
                continue;
            }
        };
        line.push('\n');
        if let Err(err) = stdout.write_all(line.as_bytes()).await {
            tracing::warn!(error = %err, "host output closed");
            break;
        }
        let _ = stdout.flush().await;
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
