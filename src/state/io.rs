//! Shared atomic-file-write plumbing used by both [`super::StateStore`]
//! and [`super::CheckpointStore`].

use crate::config::StateWriteMode;
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const RENAME_RETRY_ATTEMPTS: u32 = 3;
const RENAME_RETRY_DELAY: Duration = Duration::from_millis(50);

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&raw).ok()
}

/// Writes `value` to `path`. In [`StateWriteMode::Atomic`] (the default),
/// copies any existing primary to `backup` best-effort, writes to a temp
/// sibling, then renames into place, retrying a transient rename failure
/// a few times before falling back to copy+delete.
/// [`StateWriteMode::Direct`] bypasses all of that and writes in place.
pub async fn write_json_atomic<T: Serialize>(
    path: &Path,
    backup: Option<&Path>,
    mode: StateWriteMode,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_vec_pretty(value).context("serializing state to json")?;

    if mode == StateWriteMode::Direct {
        tokio::fs::write(path, &body)
            .await
            .context("direct state write")?;
        return Ok(());
    }

    if let Some(backup_path) = backup {
        if tokio::fs::metadata(path).await.is_ok() {
            let _ = tokio::fs::copy(path, backup_path).await;
        }
    }

    let tmp_path = tmp_sibling(path);
    tokio::fs::write(&tmp_path, &body)
        .await
        .context("writing temp state file")?;

    let mut attempt = 0;
    loop {
        match tokio::fs::rename(&tmp_path, path).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < RENAME_RETRY_ATTEMPTS && is_transient(&e) => {
                attempt += 1;
                tokio::time::sleep(RENAME_RETRY_DELAY * attempt).await;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "atomic rename failed persistently, falling back to copy+delete"
                );
                let result = tokio::fs::copy(&tmp_path, path).await;
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return result.map(|_| ()).context("copy+delete fallback also failed");
            }
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state")
        .to_string();
    name.push_str(".tmp");
    path.with_file_name(name)
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::PermissionDenied
    )
}
