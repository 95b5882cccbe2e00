use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use super::OwnerResolver;

/// Pending lookups beyond this wait for queue space (bounded by the request timeout).
const QUEUE_CAPACITY: usize = 256;

/// A long-lived helper that answers one owner per line read from stdin.
///
/// Protocol: the core writes an absolute path and a newline; the helper
/// replies with one line holding the owner (optionally `DOMAIN\user`),
/// `ENOENT` for a missing file, or `ERROR`.
#[derive(Debug, Clone)]
pub struct OwnerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl OwnerCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The helper for this platform, if it has one.
    #[cfg(windows)]
    pub fn platform_default() -> Option<Self> {
        const SCRIPT: &str = r#"
            $OutputEncoding = [System.Text.Encoding]::UTF8
            while ($line = [Console]::In.ReadLine()) {
                try {
                    if ([System.IO.File]::Exists($line) -or [System.IO.Directory]::Exists($line)) {
                        [Console]::Out.WriteLine((Get-Acl -Path $line -ErrorAction Stop).Owner)
                    } else {
                        [Console]::Out.WriteLine("ENOENT")
                    }
                } catch {
                    [Console]::Out.WriteLine("ERROR")
                }
            }
        "#;
        Some(Self::new(
            "powershell.exe",
            ["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", SCRIPT],
        ))
    }

    /// The helper for this platform, if it has one.
    #[cfg(unix)]
    pub fn platform_default() -> Option<Self> {
        let stat = if cfg!(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd")) {
            "stat -f %Su"
        } else {
            "stat -c %U"
        };
        Some(Self::new("sh", ["-c".to_string(), stat_loop(stat)]))
    }

    /// The helper for this platform, if it has one.
    #[cfg(not(any(windows, unix)))]
    pub fn platform_default() -> Option<Self> {
        None
    }
}

#[cfg(unix)]
fn stat_loop(stat: &str) -> String {
    format!(
        r#"while IFS= read -r p; do
  if [ -e "$p" ]; then {stat} -- "$p" 2>/dev/null || echo ERROR; else echo ENOENT; fi
done"#
    )
}

/// Interpret one helper reply; `None` means "use the default identity".
pub fn parse_owner_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line == "ERROR" || line == "ENOENT" {
        return None;
    }
    let user = line.rsplit('\\').next().unwrap_or(line);
    (!user.is_empty()).then(|| user.to_string())
}

struct OwnerRequest {
    path: PathBuf,
    reply: oneshot::Sender<String>,
}

/// Owner lookups through one persistent helper process.
///
/// Requests are dispatched one at a time by a background task. If the helper
/// crashes, exits, or stalls past the request timeout, the request in flight
/// resolves to the default identity and the helper is restarted after
/// `restart_delay`. Callers never wait longer than the request timeout.
pub struct SubprocessResolver {
    tx: mpsc::Sender<OwnerRequest>,
    default_identity: String,
    request_timeout: Duration,
}

impl SubprocessResolver {
    pub fn spawn(
        command: OwnerCommand,
        default_identity: String,
        request_timeout: Duration,
        restart_delay: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(dispatch(
            command,
            rx,
            default_identity.clone(),
            request_timeout,
            restart_delay,
        ));
        Self {
            tx,
            default_identity,
            request_timeout,
        }
    }
}

#[async_trait]
impl OwnerResolver for SubprocessResolver {
    async fn resolve(&self, path: &Path) -> String {
        if path.to_string_lossy().contains('\n') {
            return self.default_identity.clone();
        }
        let (reply, rx) = oneshot::channel();
        let request = OwnerRequest {
            path: path.to_path_buf(),
            reply,
        };
        let answer = tokio::time::timeout(self.request_timeout, async {
            self.tx.send(request).await.ok()?;
            rx.await.ok()
        })
        .await;
        match answer {
            Ok(Some(owner)) => owner,
            _ => self.default_identity.clone(),
        }
    }

    fn default_identity(&self) -> &str {
        &self.default_identity
    }
}

/// Serve requests until every resolver handle is dropped.
async fn dispatch(
    command: OwnerCommand,
    mut rx: mpsc::Receiver<OwnerRequest>,
    default_identity: String,
    request_timeout: Duration,
    restart_delay: Duration,
) {
    let mut helper: Option<Helper> = None;

    while let Some(request) = rx.recv().await {
        if request.reply.is_closed() {
            continue;
        }

        if helper.is_none() {
            match Helper::spawn(&command) {
                Ok(started) => helper = Some(started),
                Err(err) => {
                    tracing::warn!(
                        program = %command.program,
                        error = %err,
                        "owner helper failed to start; using default identity"
                    );
                    let _ = request.reply.send(default_identity.clone());
                    tokio::time::sleep(restart_delay).await;
                    continue;
                }
            }
        }
        let Some(active) = helper.as_mut() else {
            continue;
        };

        let outcome = active.lookup(&request.path, request_timeout).await;
        match outcome {
            Ok(line) => {
                let owner = parse_owner_line(&line).unwrap_or_else(|| default_identity.clone());
                let _ = request.reply.send(owner);
            }
            Err(err) => {
                tracing::warn!(
                    program = %command.program,
                    error = %err,
                    "owner helper failed; restarting"
                );
                let _ = request.reply.send(default_identity.clone());
                if let Some(mut dead) = helper.take() {
                    dead.kill().await;
                }
                tokio::time::sleep(restart_delay).await;
            }
        }
    }

    if let Some(mut active) = helper {
        active.kill().await;
    }
}

struct Helper {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Helper {
    fn spawn(command: &OwnerCommand) -> std::io::Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("owner helper has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("owner helper has no stdout"))?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    /// One request/response exchange. Any error leaves the helper unusable.
    async fn lookup(&mut self, path: &Path, timeout: Duration) -> anyhow::Result<String> {
        let mut line = path.to_string_lossy().into_owned();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        match tokio::time::timeout(timeout, self.stdout.next_line()).await {
            Ok(Ok(Some(answer))) => Ok(answer),
            Ok(Ok(None)) => anyhow::bail!("owner helper exited"),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => anyhow::bail!("owner lookup timed out after {timeout:?}"),
        }
    }

    async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_owner_line() {
        assert_eq!(parse_owner_line("CORP\\alice\r").as_deref(), Some("alice"));
        assert_eq!(parse_owner_line("bob").as_deref(), Some("bob"));
        assert_eq!(parse_owner_line("ERROR"), None);
        assert_eq!(parse_owner_line("ENOENT"), None);
        assert_eq!(parse_owner_line("  "), None);
    }

    #[cfg(unix)]
    fn sh(script: &str) -> OwnerCommand {
        OwnerCommand::new("sh", ["-c", script])
    }

    #[cfg(unix)]
    fn resolver(command: OwnerCommand, timeout_ms: u64) -> SubprocessResolver {
        SubprocessResolver::spawn(
            command,
            "fallback".to_string(),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(10),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_answers_are_used() {
        let r = resolver(sh(r#"while IFS= read -r p; do printf '%s\n' 'CORP\alice'; done"#), 5000);
        assert_eq!(r.resolve(Path::new("/tmp/a")).await, "alice");
        assert_eq!(r.resolve(Path::new("/tmp/b")).await, "alice");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_error_reply_falls_back() {
        let r = resolver(sh("while IFS= read -r p; do echo ERROR; done"), 5000);
        assert_eq!(r.resolve(Path::new("/tmp/a")).await, "fallback");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crashed_helper_is_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("started-once");
        let script = format!(
            r#"if [ -e "{m}" ]; then while IFS= read -r p; do echo bob; done; else touch "{m}"; read -r p; exit 1; fi"#,
            m = marker.display()
        );
        let r = resolver(sh(&script), 5000);
        // First helper dies mid-request: the request falls back instead of hanging.
        assert_eq!(r.resolve(Path::new("/tmp/a")).await, "fallback");
        // Restarted helper serves the next request.
        assert_eq!(r.resolve(Path::new("/tmp/b")).await, "bob");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_helper_times_out() {
        let r = resolver(sh("while IFS= read -r p; do sleep 30; done"), 200);
        let started = std::time::Instant::now();
        assert_eq!(r.resolve(Path::new("/tmp/a")).await, "fallback");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program_falls_back() {
        let r = SubprocessResolver::spawn(
            OwnerCommand::new("definitely-not-a-real-owner-helper", Vec::<String>::new()),
            "fallback".to_string(),
            Duration::from_millis(2000),
            Duration::from_millis(10),
        );
        assert_eq!(r.resolve(Path::new("/tmp/a")).await, "fallback");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_platform_helper_reports_missing_file() {
        let Some(command) = OwnerCommand::platform_default() else {
            return;
        };
        let r = resolver(command, 5000);
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(r.resolve(&dir.path().join("missing.txt")).await, "fallback");
    }
}
