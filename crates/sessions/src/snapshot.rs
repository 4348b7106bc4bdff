//! Mirror of a session's local credential directory into the durable store.
//!
//! A snapshot is a gzip-compressed JSON array of `{"r": path, "b": base64}`
//! entries, one per regular file, ordered by relative path (`/`-separated)
//! so identical directories always produce identical bytes.

use std::{
    io::{Read, Write},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, bail},
    base64::Engine,
    flate2::{Compression, read::GzDecoder, write::GzEncoder},
    serde::{Deserialize, Serialize},
    tracing::{debug, error, info, warn},
    walkdir::WalkDir,
};

use crate::{
    error::{Result, SessionError},
    store::{SnapshotStatus, SnapshotStore},
};

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    r: String,
    b: String,
}

/// Serialize every regular file under `dir`. File names must be UTF-8 so
/// they survive the round trip unchanged.
pub fn encode_dir(dir: &Path) -> anyhow::Result<Vec<u8>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir)?;
        let rel = rel
            .components()
            .map(|c| {
                c.as_os_str()
                    .to_str()
                    .with_context(|| format!("non UTF-8 file name {}", entry.path().display()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?
            .join("/");
        let data = std::fs::read(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        files.push((rel, data));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let b64 = base64::engine::general_purpose::STANDARD;
    let entries: Vec<SnapshotFile> = files
        .into_iter()
        .map(|(r, data)| SnapshotFile {
            r,
            b: b64.encode(data),
        })
        .collect();

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&serde_json::to_vec(&entries)?)?;
    Ok(gz.finish()?)
}

/// Decode a snapshot into `(relative path, contents)` pairs without touching
/// the filesystem.
pub fn decode_snapshot(blob: &[u8]) -> anyhow::Result<Vec<(PathBuf, Vec<u8>)>> {
    let mut json = Vec::new();
    GzDecoder::new(blob)
        .read_to_end(&mut json)
        .context("snapshot is not valid gzip")?;
    let entries: Vec<SnapshotFile> =
        serde_json::from_slice(&json).context("snapshot payload is not a file list")?;

    let b64 = base64::engine::general_purpose::STANDARD;
    entries
        .into_iter()
        .map(|f| {
            let rel = safe_relative_path(&f.r)?;
            let data = b64
                .decode(f.b.as_bytes())
                .with_context(|| format!("bad base64 for {}", f.r))?;
            Ok((rel, data))
        })
        .collect()
}

/// Only plain `a/b/c` paths are accepted; absolute paths and `..` are not.
fn safe_relative_path(raw: &str) -> anyhow::Result<PathBuf> {
    let path = PathBuf::from(raw.replace('\\', "/"));
    if raw.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("unsafe path in snapshot: {raw:?}");
    }
    Ok(path)
}

/// Materialize decoded files under `dir`, creating parents as needed.
pub fn write_files(dir: &Path, files: &[(PathBuf, Vec<u8>)]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    for (rel, data) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, data)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut d| d.next().is_some())
        .unwrap_or(false)
}

/// What `restore` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Local directory already populated; local state wins.
    LocalPresent,
    NoSnapshot,
    Restored { files: usize },
}

/// Backs up and restores credential directories through a [`SnapshotStore`].
#[derive(Clone)]
pub struct AuthSnapshotMirror {
    store: Arc<dyn SnapshotStore>,
}

impl AuthSnapshotMirror {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Snapshot `dir` and upsert it. A missing directory is skipped and
    /// reported as `false`.
    pub async fn backup(&self, id: &str, dir: &Path, status: SnapshotStatus) -> Result<bool> {
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            debug!(session_id = id, "no credential dir, skipping backup");
            return Ok(false);
        }
        let owned = dir.to_path_buf();
        let blob = tokio::task::spawn_blocking(move || encode_dir(&owned))
            .await
            .map_err(|e| SessionError::Store(format!("backup task failed: {e}")))?
            .map_err(|e| SessionError::Store(format!("failed to encode {}: {e:#}", dir.display())))?;

        self.store.upsert(id, status, &blob).await?;
        debug!(session_id = id, %status, bytes = blob.len(), "credentials backed up");
        Ok(true)
    }

    /// Re-materialize the stored snapshot into `dir` unless `dir` already has
    /// content.
    pub async fn restore(&self, id: &str, dir: &Path) -> Result<RestoreOutcome> {
        if has_entries(dir) {
            return Ok(RestoreOutcome::LocalPresent);
        }
        let Some(record) = self.store.find(id).await? else {
            return Ok(RestoreOutcome::NoSnapshot);
        };
        if record.status == SnapshotStatus::Corrupt {
            return Err(SessionError::SnapshotRestore {
                id: id.to_string(),
                message: "snapshot previously failed to decode; clear it to start fresh".into(),
            });
        }

        let files = match decode_snapshot(&record.blob) {
            Ok(files) => files,
            Err(e) => {
                error!(session_id = id, error = %format!("{e:#}"), "credential snapshot is corrupt");
                if let Err(mark) = self.store.set_status(id, SnapshotStatus::Corrupt).await {
                    warn!(session_id = id, error = %mark, "failed to mark snapshot corrupt");
                }
                return Err(SessionError::SnapshotRestore {
                    id: id.to_string(),
                    message: format!("{e:#}"),
                });
            },
        };

        let count = files.len();
        let owned = dir.to_path_buf();
        let written = tokio::task::spawn_blocking(move || write_files(&owned, &files))
            .await
            .map_err(|e| SessionError::Store(format!("restore task failed: {e}")))?;
        if let Err(e) = written {
            if let Err(rm) = tokio::fs::remove_dir_all(dir).await
                && rm.kind() != std::io::ErrorKind::NotFound
            {
                warn!(session_id = id, error = %rm, "failed to remove partial restore");
            }
            return Err(SessionError::Store(format!(
                "failed to restore into {}: {e:#}",
                dir.display()
            )));
        }

        info!(session_id = id, files = count, "credentials restored from snapshot");
        Ok(RestoreOutcome::Restored { files: count })
    }

    /// Drop both the local directory and the durable row.
    pub async fn purge(&self, id: &str, dir: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => info!(session_id = id, dir = %dir.display(), "credential dir removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(session_id = id, "credential dir already gone");
            },
            Err(e) => warn!(session_id = id, error = %e, "failed to remove credential dir"),
        }
        self.store.delete(id).await?;
        Ok(())
    }
}
