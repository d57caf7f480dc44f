//! Per-store SKU state: the durable record both diffing and marketplace
//! acknowledgment tracking key off. Backed by a JSON file with a `.bak`
//! sibling — see the load contract below, which is correctness-critical.

use super::io;
use crate::config::StateWriteMode;
use crate::models::StateMap;
use std::path::PathBuf;
use tracing::{error, warn};

/// How the last `load` resolved, exposed mainly for tests that exercise
/// the absent/corrupt/backup distinction directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Absent,
    Primary,
    RecoveredFromBackup,
    BothCorrupt,
}

pub struct StateStore {
    primary: PathBuf,
    backup: PathBuf,
    write_mode: StateWriteMode,
}

impl StateStore {
    pub fn new(state_dir: &std::path::Path, store_id: i64, write_mode: StateWriteMode) -> Self {
        Self {
            primary: state_dir.join(format!(".state-store-{store_id}.json")),
            backup: state_dir.join(format!(".state-store-{store_id}.json.bak")),
            write_mode,
        }
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.primary).await.is_ok()
    }

    pub async fn delete(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.primary).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Absent primary returns empty without consulting the backup — an
    /// absent file means "no state yet", not "corrupt", and must force a
    /// force-full run upstream rather than a silent backup recovery.
    pub async fn load(&self) -> StateMap {
        self.load_with_outcome().await.0
    }

    pub async fn load_with_outcome(&self) -> (StateMap, LoadOutcome) {
        if !self.exists().await {
            return (StateMap::new(), LoadOutcome::Absent);
        }

        match io::read_json::<StateMap>(&self.primary).await {
            Some(map) if is_valid(&map) => (map, LoadOutcome::Primary),
            _ => {
                warn!(
                    path = %self.primary.display(),
                    "primary state file unparseable or invalid, consulting backup"
                );
                match io::read_json::<StateMap>(&self.backup).await {
                    Some(map) if is_valid(&map) => (map, LoadOutcome::RecoveredFromBackup),
                    _ => {
                        error!(
                            path = %self.primary.display(),
                            "primary and backup state both unusable, starting from empty state"
                        );
                        (StateMap::new(), LoadOutcome::BothCorrupt)
                    }
                }
            }
        }
    }

    /// Crash-atomic. Failures are logged and leave the previous file
    /// intact; the caller treats this as a non-fatal degradation — the
    /// next run re-diffs from whatever state is still on disk.
    pub async fn save(&self, state: &StateMap) {
        if let Err(e) =
            io::write_json_atomic(&self.primary, Some(&self.backup), self.write_mode, state).await
        {
            warn!(
                error = %e,
                store = %self.primary.display(),
                "state save failed, next run will re-diff from previous state"
            );
        }
    }
}

/// Schema validation: every entry's price, if present, must be finite.
/// Quantity and enabled are already validated by serde's own typed
/// deserialization (an `i64`/`bool` mismatch fails the parse outright).
fn is_valid(map: &StateMap) -> bool {
    map.values().all(|entry| entry.price.map_or(true, |p| p.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StateEntry;
    use chrono::Utc;
    use tempfile::TempDir;

    fn entry(quantity: i64, price: Option<f64>) -> StateEntry {
        StateEntry {
            quantity,
            enabled: quantity > 0,
            price,
            last_seen: Utc::now(),
            synced_to_marketplace: false,
        }
    }

    #[tokio::test]
    async fn absent_primary_loads_empty_without_consulting_backup() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), 1, StateWriteMode::Atomic);

        let (map, outcome) = store.load_with_outcome().await;
        assert!(map.is_empty());
        assert_eq!(outcome, LoadOutcome::Absent);
    }

    #[tokio::test]
    async fn round_trips_a_saved_state_map() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), 2, StateWriteMode::Atomic);
        let mut map = StateMap::new();
        map.insert("SKU1".to_string(), entry(5, Some(10.0)));

        store.save(&map).await;
        let (loaded, outcome) = store.load_with_outcome().await;

        assert_eq!(loaded, map);
        assert_eq!(outcome, LoadOutcome::Primary);
    }

    #[tokio::test]
    async fn corrupt_primary_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), 3, StateWriteMode::Atomic);
        let mut map = StateMap::new();
        map.insert("SKU1".to_string(), entry(5, Some(10.0)));
        store.save(&map).await;

        // Second save rotates the valid map into `.bak`.
        let mut map2 = map.clone();
        map2.insert("SKU2".to_string(), entry(1, Some(1.0)));
        store.save(&map2).await;

        tokio::fs::write(&store.primary, b"{not json").await.unwrap();

        let (loaded, outcome) = store.load_with_outcome().await;
        assert_eq!(outcome, LoadOutcome::RecoveredFromBackup);
        assert_eq!(loaded, map);
    }

    #[tokio::test]
    async fn both_primary_and_backup_corrupt_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), 4, StateWriteMode::Atomic);
        tokio::fs::write(&store.primary, b"{not json").await.unwrap();
        tokio::fs::write(&store.backup, b"{also not json").await.unwrap();

        let (loaded, outcome) = store.load_with_outcome().await;
        assert!(loaded.is_empty());
        assert_eq!(outcome, LoadOutcome::BothCorrupt);
    }

    #[tokio::test]
    async fn deleting_primary_forces_next_load_to_be_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), 5, StateWriteMode::Atomic);
        let mut map = StateMap::new();
        map.insert("SKU1".to_string(), entry(5, Some(10.0)));
        store.save(&map).await;

        store.delete().await.unwrap();

        let (loaded, outcome) = store.load_with_outcome().await;
        assert!(loaded.is_empty());
        assert_eq!(outcome, LoadOutcome::Absent);
    }

    #[tokio::test]
    async fn out_of_range_price_parses_to_infinity_and_is_rejected_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), 6, StateWriteMode::Atomic);
        let raw = r#"{"BAD":{"quantity":1,"enabled":true,"price":1e400,"last_seen":"2026-01-01T00:00:00Z","synced_to_marketplace":false}}"#;
        tokio::fs::write(&store.primary, raw).await.unwrap();

        let (loaded, outcome) = store.load_with_outcome().await;
        assert_eq!(outcome, LoadOutcome::BothCorrupt);
        assert!(loaded.is_empty());
    }
}
