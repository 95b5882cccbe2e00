use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::AsyncWriteExt;

use crate::project::{ProjectLayout, SNAPSHOT_EXT};

/// Stored in place of any content containing a NUL byte. Binary files are
/// recorded but never diffed.
pub const BINARY_PLACEHOLDER: &str = "[Binary file content not shown]";

/// File bodies captured at change time, one file per snapshot id.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_layout(layout: &ProjectLayout) -> Self {
        Self::new(layout.snapshots_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<snapshot_id>.txt`, or `None` for ids that would escape `dir`.
    pub fn snapshot_path(&self, snapshot_id: &str) -> Option<PathBuf> {
        let valid = !snapshot_id.is_empty()
            && !snapshot_id.contains(['/', '\\'])
            && snapshot_id != "."
            && snapshot_id != "..";
        valid.then(|| self.dir.join(format!("{snapshot_id}.{SNAPSHOT_EXT}")))
    }

    /// Write a new snapshot. Never overwrites: an existing file with the same
    /// id fails with `ErrorKind::AlreadyExists` so the caller can re-identify.
    pub async fn put(&self, snapshot_id: &str, content: &str) -> std::io::Result<()> {
        let path = self.snapshot_path(snapshot_id).ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid snapshot id: {snapshot_id:?}"),
            )
        })?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Best-effort removal of a snapshot no event refers to.
    pub async fn discard(&self, snapshot_id: &str) {
        if let Some(path) = self.snapshot_path(snapshot_id)
            && let Err(err) = tokio::fs::remove_file(&path).await
        {
            tracing::debug!(path = %path.display(), error = %err, "failed to remove orphan snapshot");
        }
    }

    /// Load a snapshot. A missing file is `Ok(None)`, not an error.
    pub fn get(&self, snapshot_id: &str) -> anyhow::Result<Option<String>> {
        let Some(path) = self.snapshot_path(snapshot_id) else {
            return Ok(None);
        };
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(decode_content(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read snapshot {}", path.display()))
            }
        }
    }
}

/// Turn raw file bytes into snapshot text, replacing binary content.
pub fn decode_content(bytes: Vec<u8>) -> String {
    if bytes.contains(&0) {
        return BINARY_PLACEHOLDER.to_string();
    }
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// Best-effort read of a file's current content.
///
/// Returns `None` when the file vanished or is unreadable; the event is
/// then recorded without a snapshot.
pub async fn capture(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(decode_content(bytes)),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "content unreadable; no snapshot");
            None
        }
    }
}
