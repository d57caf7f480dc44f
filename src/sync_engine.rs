//! The per-run pipeline: fetch from the SoT, diff against the previous
//! state, two-phase push to the marketplace. Everything else in this
//! crate exists to serve one call to [`SyncEngine::run`].

use crate::adapters::{ItemUpdate, InventoryUpdate, MarketplaceAdapter, MarketplaceOutcome, SotAdapter};
use crate::batcher::AdaptiveBatcher;
use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::SyncError;
use crate::governor::RateGovernor;
use crate::models::{build_sku_view, CheckpointRecord, SkuView, StateEntry, StateMap, Store, VenueKey};
use crate::retry::{retry, Failure, RetryPolicy};
use crate::state::{CheckpointStore, StateStore};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Bootstrap,
    ForceFull,
    Delta,
    Limited,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub mode: SyncMode,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self { mode: SyncMode::Delta, limit: None, dry_run: false }
    }
}

/// A run either completes or returns `Err` — there is no partial
/// per-run outcome. `partial` is a sweep-level concept; see
/// [`crate::scheduler::SweepOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub mode_used: SyncMode,
    pub items_pushed: usize,
    pub inventory_pushed: usize,
    pub skus_seen: usize,
}

pub struct SyncEngine {
    store: Store,
    venue: VenueKey,
    sot: Box<dyn SotAdapter>,
    marketplace: Box<dyn MarketplaceAdapter>,
    state_store: StateStore,
    checkpoint_store: CheckpointStore,
    governor: std::sync::Arc<RateGovernor>,
    batcher: std::sync::Arc<AdaptiveBatcher>,
    sot_breaker: std::sync::Arc<CircuitBreaker>,
    marketplace_breaker: std::sync::Arc<CircuitBreaker>,
    config: Config,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        sot: Box<dyn SotAdapter>,
        marketplace: Box<dyn MarketplaceAdapter>,
        governor: std::sync::Arc<RateGovernor>,
        batcher: std::sync::Arc<AdaptiveBatcher>,
        sot_breaker: std::sync::Arc<CircuitBreaker>,
        marketplace_breaker: std::sync::Arc<CircuitBreaker>,
        config: Config,
    ) -> Self {
        let venue = VenueKey::for_store(&store, &config.default_marketplace_base_url);
        let state_store = StateStore::new(&config.state_dir, store.id, config.state_write_mode);
        let checkpoint_store = CheckpointStore::new(&config.state_dir, store.id, config.state_write_mode);
        Self {
            store,
            venue,
            sot,
            marketplace,
            state_store,
            checkpoint_store,
            governor,
            batcher,
            sot_breaker,
            marketplace_breaker,
            config,
        }
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        info!(store = self.store.id, mode = ?request.mode, "sync run starting");

        let (mut previous, load_outcome) = self.state_store.load_with_outcome().await;
        let mut mode = request.mode;
        if previous.is_empty() && mode != SyncMode::Bootstrap {
            warn!(store = self.store.id, ?load_outcome, "no prior state, upgrading to force-full");
            mode = SyncMode::ForceFull;
        }

        let view = self.fetch_sku_view().await?;
        let skus_seen = view.len();

        if mode == SyncMode::Bootstrap {
            let bootstrap_state = bootstrap_state_map(&view);
            self.state_store.save(&bootstrap_state).await;
            info!(store = self.store.id, skus = skus_seen, "bootstrap complete, no marketplace calls made");
            return Ok(RunReport {
                outcome: RunOutcome::Success,
                mode_used: mode,
                items_pushed: 0,
                inventory_pushed: 0,
                skus_seen,
            });
        }

        let mut item_updates = Vec::new();
        let mut inventory_updates = Vec::new();
        diff_against_previous(&view, &previous, mode, &mut item_updates, &mut inventory_updates);
        detect_missing_skus(&view, &mut previous, &mut item_updates, &mut inventory_updates);

        if let Some(limit) = request.limit {
            item_updates.truncate(limit);
            inventory_updates.truncate(limit);
        }

        let items_pushed = item_updates.len();
        let inventory_pushed = inventory_updates.len();

        if request.dry_run {
            info!(store = self.store.id, items_pushed, inventory_pushed, "dry run, skipping marketplace push");
            return Ok(RunReport {
                outcome: RunOutcome::Success,
                mode_used: mode,
                items_pushed,
                inventory_pushed,
                skus_seen,
            });
        }

        self.sot_breaker.check().map_err(anyhow::Error::from)?;
        self.marketplace_breaker.check().map_err(anyhow::Error::from)?;

        let batch_size = self.batch_size_for(mode);
        let batch_delay = self.batch_delay_for(mode);

        // A force-full push is the long, many-batch run the checkpoint
        // exists to protect; a crash partway through leaves a checkpoint
        // behind that the next force-full run resumes from instead of
        // re-pushing already-confirmed batches.
        let (item_skip, inventory_skip) = if mode == SyncMode::ForceFull {
            let checkpoint = self.checkpoint_store.load().await;
            match checkpoint.phase.as_str() {
                "item" => {
                    info!(store = self.store.id, batches = checkpoint.completed_batches, "resuming item phase from checkpoint");
                    (checkpoint.completed_batches, 0)
                }
                "inventory" => {
                    info!(store = self.store.id, batches = checkpoint.completed_batches, "item phase already checkpointed complete, resuming inventory phase");
                    (u32::MAX, checkpoint.completed_batches)
                }
                _ => (0, 0),
            }
        } else {
            (0, 0)
        };

        self.push_items(&item_updates, batch_size, batch_delay, &mut previous, item_skip).await?;
        tokio::time::sleep(self.config.phase_pause).await;
        self.push_inventory(&inventory_updates, batch_size, batch_delay, &mut previous, inventory_skip).await?;

        if request.limit.is_none() {
            self.state_store.save(&previous).await;
            if let Err(e) = self.checkpoint_store.delete().await {
                warn!(store = self.store.id, error = %e, "failed to delete checkpoint after successful run");
            }
        } else {
            info!(store = self.store.id, "limited run, final state not persisted");
        }

        info!(store = self.store.id, items_pushed, inventory_pushed, "sync run complete");
        Ok(RunReport { outcome: RunOutcome::Success, mode_used: mode, items_pushed, inventory_pushed, skus_seen })
    }

    async fn fetch_sku_view(&self) -> Result<HashMap<String, SkuView>> {
        self.sot_breaker.check().map_err(anyhow::Error::from)?;

        let policy = RetryPolicy::auth();
        let inventory = retry(
            &policy,
            || self.sot.inventory(self.store.id),
            classify_sot_failure,
        )
        .await;

        let inventory = match inventory {
            Ok(records) => {
                self.sot_breaker.on_success();
                records
            }
            Err(e) => {
                self.sot_breaker.on_failure();
                return Err(e).context("fetching SoT inventory");
            }
        };

        let ids: Vec<i64> = inventory.iter().map(|r| r.id).collect();
        let details = retry(
            &policy,
            || self.sot.products(&ids),
            classify_sot_failure,
        )
        .await;

        let details = match details {
            Ok(details) => {
                self.sot_breaker.on_success();
                details
            }
            Err(e) => {
                self.sot_breaker.on_failure();
                return Err(e).context("fetching SoT product details");
            }
        };

        Ok(build_sku_view(&inventory, &details))
    }

    /// First-sync/force-full gets the conservative cold-cache tier;
    /// delta and limited runs get the larger fixed steady-state tier.
    /// AdaptiveBatcher's learned size is reserved for the hybrid-init
    /// priority push and the background worker (spec §4.9 step 3, §4.8
    /// step 5) — not for this everyday scheduled path.
    fn batch_size_for(&self, mode: SyncMode) -> usize {
        match mode {
            SyncMode::ForceFull | SyncMode::Bootstrap => self.config.first_sync_batch_size,
            SyncMode::Delta | SyncMode::Limited => self.config.delta_batch_size,
        }
    }

    fn batch_delay_for(&self, mode: SyncMode) -> std::time::Duration {
        match mode {
            SyncMode::ForceFull | SyncMode::Bootstrap => self.config.first_sync_batch_delay,
            SyncMode::Delta | SyncMode::Limited => self.config.delta_batch_delay,
        }
    }

    async fn push_items(
        &self,
        updates: &[ItemUpdate],
        batch_size: usize,
        delay: std::time::Duration,
        state: &mut StateMap,
        skip_batches: u32,
    ) -> Result<()> {
        let total = updates.len().div_ceil(batch_size.max(1)) as u32;
        let mut completed = skip_batches.min(total);

        for (idx, chunk) in updates.chunks(batch_size.max(1)).enumerate() {
            if (idx as u32) < skip_batches {
                for update in chunk {
                    if let Some(entry) = state.get_mut(&update.sku) {
                        entry.synced_to_marketplace = true;
                    }
                }
                continue;
            }

            self.governor.wait_for_turn(&self.venue).await;
            self.push_one_batch(|| self.marketplace.push_items(&self.store.venue_id, chunk)).await?;

            for update in chunk {
                if let Some(entry) = state.get_mut(&update.sku) {
                    entry.synced_to_marketplace = true;
                }
            }
            completed += 1;
            self.checkpoint_store
                .save(&CheckpointRecord { completed_batches: completed, total_batches: total, phase: "item".into() })
                .await;

            if completed < total {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn push_inventory(
        &self,
        updates: &[InventoryUpdate],
        batch_size: usize,
        delay: std::time::Duration,
        state: &mut StateMap,
        skip_batches: u32,
    ) -> Result<()> {
        let total = updates.len().div_ceil(batch_size.max(1)) as u32;
        let mut completed = skip_batches.min(total);

        for (idx, chunk) in updates.chunks(batch_size.max(1)).enumerate() {
            if (idx as u32) < skip_batches {
                for update in chunk {
                    if let Some(entry) = state.get_mut(&update.sku) {
                        entry.synced_to_marketplace = true;
                    }
                }
                continue;
            }

            self.governor.wait_for_turn(&self.venue).await;
            self.push_one_batch(|| self.marketplace.push_inventory(&self.store.venue_id, chunk)).await?;

            for update in chunk {
                if let Some(entry) = state.get_mut(&update.sku) {
                    entry.synced_to_marketplace = true;
                }
            }
            completed += 1;
            self.checkpoint_store
                .save(&CheckpointRecord {
                    completed_batches: completed,
                    total_batches: total,
                    phase: "inventory".into(),
                })
                .await;

            if completed < total {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn push_one_batch<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<MarketplaceOutcome>>,
    {
        self.marketplace_breaker.check().map_err(anyhow::Error::from)?;

        let policy = RetryPolicy::marketplace();
        let result = retry(&policy, &op, classify_marketplace_failure).await;

        match result {
            Ok(MarketplaceOutcome::Success) => {
                self.marketplace_breaker.on_success();
                self.governor.on_success(&self.venue);
                self.batcher.on_success(&self.venue.to_string());
                Ok(())
            }
            Ok(MarketplaceOutcome::Duplicate) => {
                info!(venue = %self.venue, "marketplace reported duplicate batch, treating as success");
                self.marketplace_breaker.on_success();
                Ok(())
            }
            Err(e) => {
                self.marketplace_breaker.on_failure();
                if let Some(SyncError::MarketplaceRateLimited { retry_after }) = e.downcast_ref::<SyncError>() {
                    self.governor.on_rate_limited(&self.venue, *retry_after);
                    self.batcher.on_rate_limit(&self.venue.to_string());
                }
                Err(e).context("marketplace batch push failed")
            }
        }
    }
}

fn classify_sot_failure(err: &anyhow::Error) -> Failure {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::SotAuth(_)) => Failure { retriable: true, retry_after: None },
        _ => Failure { retriable: false, retry_after: None },
    }
}

fn classify_marketplace_failure(err: &anyhow::Error) -> Failure {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::MarketplaceRateLimited { retry_after }) => {
            Failure { retriable: true, retry_after: *retry_after }
        }
        Some(SyncError::MarketplaceServerError { .. }) => Failure { retriable: true, retry_after: None },
        Some(SyncError::MarketplaceTerminal { .. }) => Failure { retriable: false, retry_after: None },
        _ => Failure { retriable: true, retry_after: None },
    }
}

fn bootstrap_state_map(view: &HashMap<String, SkuView>) -> StateMap {
    view.values()
        .map(|v| {
            (
                v.sku.clone(),
                StateEntry {
                    quantity: v.quantity,
                    enabled: v.enabled,
                    price: v.price,
                    last_seen: Utc::now(),
                    synced_to_marketplace: false,
                },
            )
        })
        .collect()
}

/// The invalid-price force-zero rule from the pipeline's step 6: a SKU
/// with no valid price still gets pushed, but zeroed out and disabled
/// rather than silently dropped (it would otherwise go stale forever).
fn force_zero_if_invalid_price(view: &SkuView) -> (i64, bool, Option<f64>) {
    match view.price {
        Some(p) if p.is_finite() && p >= 0.0 => (view.quantity, view.enabled, view.price),
        _ => {
            warn!(sku = %view.sku, "invalid price, forcing quantity=0 enabled=false price=0");
            (0, false, Some(0.0))
        }
    }
}

fn diff_against_previous(
    view: &HashMap<String, SkuView>,
    previous: &StateMap,
    mode: SyncMode,
    item_updates: &mut Vec<ItemUpdate>,
    inventory_updates: &mut Vec<InventoryUpdate>,
) {
    for v in view.values() {
        let (quantity, enabled, price) = force_zero_if_invalid_price(v);
        let prior = previous.get(&v.sku);

        let is_new = prior.is_none();
        let quantity_changed = prior.map_or(true, |p| p.quantity != quantity);
        let item_changed = prior.map_or(true, |p| p.enabled != enabled || p.price != price);

        if mode == SyncMode::ForceFull {
            item_updates.push(ItemUpdate { sku: v.sku.clone(), enabled: Some(enabled), price });
            inventory_updates.push(InventoryUpdate { sku: v.sku.clone(), inventory: quantity });
            continue;
        }

        if is_new {
            item_updates.push(ItemUpdate { sku: v.sku.clone(), enabled: Some(enabled), price });
            inventory_updates.push(InventoryUpdate { sku: v.sku.clone(), inventory: quantity });
            continue;
        }

        if quantity_changed {
            inventory_updates.push(InventoryUpdate { sku: v.sku.clone(), inventory: quantity });
        }
        if item_changed {
            item_updates.push(ItemUpdate { sku: v.sku.clone(), enabled: Some(enabled), price });
        }
    }
}

/// Step 8: a SKU present in the previous state but absent from this
/// run's view gets disabled and zeroed, and the state entry is rewritten
/// in place so the disable signal survives a restart even if this run's
/// push never completes.
fn detect_missing_skus(
    view: &HashMap<String, SkuView>,
    previous: &mut StateMap,
    item_updates: &mut Vec<ItemUpdate>,
    inventory_updates: &mut Vec<InventoryUpdate>,
) {
    let missing: Vec<String> = previous.keys().filter(|sku| !view.contains_key(*sku)).cloned().collect();

    for sku in missing {
        inventory_updates.push(InventoryUpdate { sku: sku.clone(), inventory: 0 });
        item_updates.push(ItemUpdate { sku: sku.clone(), enabled: Some(false), price: None });

        if let Some(entry) = previous.get_mut(&sku) {
            entry.quantity = 0;
            entry.enabled = false;
            entry.last_seen = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FakeMarketplaceAdapter, FakeSotAdapter};
    use crate::config::StateWriteMode;
    use crate::models::{AddField, InventoryRecord, ProductDetail, SKU_FIELD};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store() -> Store {
        Store {
            id: 1,
            name: "test".into(),
            venue_id: "v1".into(),
            username: "u".into(),
            password: "p".into(),
            base_url: None,
            enabled: true,
        }
    }

    fn config(dir: &std::path::Path) -> Config {
        Config {
            stores: vec![],
            default_marketplace_base_url: "https://mp.example.com".into(),
            default_sot_base_url: "https://sot.example.com".into(),
            state_dir: dir.to_path_buf(),
            state_write_mode: StateWriteMode::Atomic,
            sync_interval: std::time::Duration::from_secs(900),
            first_sync_batch_size: 10,
            first_sync_batch_delay: std::time::Duration::from_millis(1),
            delta_batch_size: 100,
            delta_batch_delay: std::time::Duration::from_millis(1),
            phase_pause: std::time::Duration::from_millis(1),
            adaptive_min_batch: 10,
            adaptive_max_batch: 200,
            adaptive_initial_batch: 25,
            adaptive_increase_threshold: 5,
            adaptive_increase_rate: 1.5,
            adaptive_decrease_rate: 0.5,
            rate_limit_min_interval: std::time::Duration::from_millis(1),
            rate_limit_learning_enabled: true,
            rate_limit_learned_cap: std::time::Duration::from_secs(5),
            rate_limit_jitter: std::time::Duration::from_millis(0),
            rate_limit_buffer: std::time::Duration::from_millis(1),
            rate_limit_post_success_enforcement: false,
            background_daily_limit: 500,
            background_initial_delay: std::time::Duration::from_secs(3600),
            background_batch_interval: std::time::Duration::from_secs(86_400),
            priority_limit: 500,
            priority_in_stock_weight: 100,
            priority_high_stock_weight: 20,
            priority_high_stock_threshold: 50,
            priority_low_stock_weight: 10,
            priority_low_stock_threshold: 5,
            priority_high_value_weight: 15,
            priority_high_value_threshold: 50.0,
            health_port: 8080,
        }
    }

    fn detail(id: i64, price: Option<f64>, sku: &str) -> ProductDetail {
        ProductDetail {
            id,
            title: format!("p{id}"),
            price,
            add_fields: vec![AddField { field: SKU_FIELD.to_string(), value: sku.to_string() }],
        }
    }

    fn engine(dir: &std::path::Path, inventory: Vec<InventoryRecord>, details: Vec<ProductDetail>) -> SyncEngine {
        let cfg = config(dir);
        SyncEngine::new(
            store(),
            Box::new(FakeSotAdapter::new(inventory, details)),
            Box::new(FakeMarketplaceAdapter::new(vec![])),
            Arc::new(RateGovernor::new(&cfg)),
            Arc::new(AdaptiveBatcher::new(&cfg)),
            Arc::new(CircuitBreaker::for_sot()),
            Arc::new(CircuitBreaker::for_marketplace()),
            cfg,
        )
    }

    #[tokio::test]
    async fn force_full_run_with_no_prior_state_pushes_every_sku() {
        let dir = TempDir::new().unwrap();
        let inventory = vec![InventoryRecord { id: 1, rest: 10, store_id: 1 }];
        let details = vec![detail(1, Some(9.99), "SKU1")];
        let engine = engine(dir.path(), inventory, details);

        let report = engine.run(RunRequest::default()).await.unwrap();
        assert_eq!(report.mode_used, SyncMode::ForceFull);
        assert_eq!(report.items_pushed, 1);
        assert_eq!(report.inventory_pushed, 1);
        assert_eq!(report.outcome, RunOutcome::Success);
    }

    #[tokio::test]
    async fn bootstrap_mode_writes_state_without_pushing() {
        let dir = TempDir::new().unwrap();
        let inventory = vec![InventoryRecord { id: 1, rest: 10, store_id: 1 }];
        let details = vec![detail(1, Some(9.99), "SKU1")];
        let engine = engine(dir.path(), inventory, details);

        let report = engine.run(RunRequest { mode: SyncMode::Bootstrap, ..Default::default() }).await.unwrap();
        assert_eq!(report.items_pushed, 0);
        assert_eq!(report.inventory_pushed, 0);

        let (state, _) = engine.state_store.load_with_outcome().await;
        assert_eq!(state.get("SKU1").unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn invalid_price_sku_is_force_zeroed_not_dropped() {
        let dir = TempDir::new().unwrap();
        let inventory = vec![InventoryRecord { id: 1, rest: 10, store_id: 1 }];
        let details = vec![detail(1, None, "SKU1")];
        let engine = engine(dir.path(), inventory, details);

        let report = engine.run(RunRequest::default()).await.unwrap();
        assert_eq!(report.items_pushed, 1);
        assert_eq!(report.inventory_pushed, 1);
    }

    #[tokio::test]
    async fn empty_sot_inventory_aborts_rather_than_disabling_everything() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path(), vec![], vec![]);
        let result = engine.run(RunRequest::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delta_run_only_pushes_changed_skus() {
        let dir = TempDir::new().unwrap();
        let inventory = vec![InventoryRecord { id: 1, rest: 10, store_id: 1 }];
        let details = vec![detail(1, Some(9.99), "SKU1")];
        let engine = engine(dir.path(), inventory.clone(), details.clone());
        engine.run(RunRequest::default()).await.unwrap();

        let unchanged_report = engine.run(RunRequest { mode: SyncMode::Delta, ..Default::default() }).await.unwrap();
        assert_eq!(unchanged_report.items_pushed, 0);
        assert_eq!(unchanged_report.inventory_pushed, 0);
    }

    #[tokio::test]
    async fn missing_sku_is_disabled_and_zeroed() {
        let dir = TempDir::new().unwrap();
        let first_inventory = vec![InventoryRecord { id: 1, rest: 10, store_id: 1 }];
        let first_details = vec![detail(1, Some(9.99), "SKU1")];
        let first_run = engine(dir.path(), first_inventory, first_details);
        first_run.run(RunRequest::default()).await.unwrap();

        // SKU1 is now gone from the SoT's view entirely; a fresh engine
        // sharing the same state directory should see it as missing.
        let second_inventory = vec![InventoryRecord { id: 2, rest: 5, store_id: 1 }];
        let second_details = vec![detail(2, Some(1.0), "SKU2")];
        let second_run = engine(dir.path(), second_inventory, second_details);

        let report = second_run.run(RunRequest { mode: SyncMode::Delta, ..Default::default() }).await.unwrap();
        assert!(report.inventory_pushed >= 2); // SKU2 new + SKU1 disabled
    }

    #[tokio::test]
    async fn limited_run_does_not_persist_final_state() {
        let dir = TempDir::new().unwrap();
        let inventory = vec![
            InventoryRecord { id: 1, rest: 10, store_id: 1 },
            InventoryRecord { id: 2, rest: 5, store_id: 1 },
        ];
        let details = vec![detail(1, Some(9.99), "SKU1"), detail(2, Some(1.0), "SKU2")];
        let engine = engine(dir.path(), inventory, details);

        let report = engine
            .run(RunRequest { mode: SyncMode::Limited, limit: Some(1), dry_run: false })
            .await
            .unwrap();
        assert_eq!(report.items_pushed, 1);

        assert!(!engine.state_store.exists().await);
    }

    #[tokio::test]
    async fn force_full_resumes_from_checkpoint_instead_of_repushing_confirmed_batches() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.first_sync_batch_size = 1;

        let checkpoint_store = CheckpointStore::new(&cfg.state_dir, store().id, cfg.state_write_mode);
        checkpoint_store
            .save(&CheckpointRecord { completed_batches: 1, total_batches: 2, phase: "item".into() })
            .await;

        let inventory = vec![
            InventoryRecord { id: 1, rest: 10, store_id: 1 },
            InventoryRecord { id: 2, rest: 5, store_id: 1 },
        ];
        let details = vec![detail(1, Some(9.99), "SKU1"), detail(2, Some(1.0), "SKU2")];

        let marketplace = Arc::new(FakeMarketplaceAdapter::new(vec![]));
        let engine = SyncEngine::new(
            store(),
            Box::new(FakeSotAdapter::new(inventory, details)),
            Box::new(Arc::clone(&marketplace)),
            Arc::new(RateGovernor::new(&cfg)),
            Arc::new(AdaptiveBatcher::new(&cfg)),
            Arc::new(CircuitBreaker::for_sot()),
            Arc::new(CircuitBreaker::for_marketplace()),
            cfg,
        );

        let report = engine.run(RunRequest::default()).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Success);

        // Batch size 1 over two SKUs means two item batches; the first was
        // already checkpointed as confirmed, so only the second should have
        // actually reached the marketplace.
        assert_eq!(marketplace.item_pushes.lock().len(), 1);

        // A successful force-full run clears the checkpoint.
        let remaining = engine.checkpoint_store.load().await;
        assert_eq!(remaining.completed_batches, 0);
        assert_eq!(remaining.total_batches, 0);
    }
}
