//! Crash-recovery bookkeeping for a long initial push: how many batches
//! of the current phase have landed, so a restart resumes a bootstrap
//! push instead of starting it over. Identical in structure to
//! [`super::StateStore`] but keyed separately and without a backup.

use super::io;
use crate::config::StateWriteMode;
use crate::models::CheckpointRecord;
use std::path::PathBuf;
use tracing::warn;

pub struct CheckpointStore {
    path: PathBuf,
    write_mode: StateWriteMode,
}

impl CheckpointStore {
    pub fn new(state_dir: &std::path::Path, store_id: i64, write_mode: StateWriteMode) -> Self {
        Self {
            path: state_dir.join(format!(".checkpoint-store-{store_id}.json")),
            write_mode,
        }
    }

    pub async fn load(&self) -> CheckpointRecord {
        io::read_json::<CheckpointRecord>(&self.path)
            .await
            .unwrap_or_default()
    }

    pub async fn save(&self, record: &CheckpointRecord) {
        if let Err(e) = io::write_json_atomic(&self.path, None, self.write_mode, record).await {
            warn!(error = %e, path = %self.path.display(), "checkpoint save failed");
        }
    }

    pub async fn delete(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trips_a_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), 9, StateWriteMode::Atomic);
        let record = CheckpointRecord {
            completed_batches: 3,
            total_batches: 10,
            phase: "item".to_string(),
        };

        store.save(&record).await;
        let loaded = store.load().await;

        assert_eq!(loaded.completed_batches, 3);
        assert_eq!(loaded.phase, "item");
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_default() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), 10, StateWriteMode::Atomic);

        let loaded = store.load().await;
        assert_eq!(loaded.completed_batches, 0);
        assert_eq!(loaded.total_batches, 0);
    }
}
