//! Long-running per-store task that mops up SKUs the marketplace has
//! never acknowledged, at a bounded daily rate, without competing with
//! the scheduled delta sync. Spawned once per store by the
//! [`crate::hybrid_orchestrator::HybridOrchestrator`] the same way
//! `main.rs` spawns the Polymarket book-store poller: a `tokio::spawn`
//! loop with a `tokio::sync::watch` stop signal checked between phases.

use crate::adapters::{ItemUpdate, InventoryUpdate, MarketplaceAdapter, MarketplaceOutcome, SotAdapter};
use crate::batcher::AdaptiveBatcher;
use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::SyncError;
use crate::governor::RateGovernor;
use crate::models::{build_sku_view, Store, VenueKey};
use crate::retry::{retry, Failure, RetryPolicy};
use crate::state::StateStore;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub total_items: usize,
    pub synced_items: usize,
    pub remaining_items: usize,
    pub percent_complete: f64,
    pub estimated_days_remaining: f64,
    pub last_sync_at: chrono::DateTime<Utc>,
    pub started_at: chrono::DateTime<Utc>,
}

pub struct BackgroundWorker {
    store: Store,
    venue: VenueKey,
    sot: Box<dyn SotAdapter>,
    marketplace: Box<dyn MarketplaceAdapter>,
    state_store: StateStore,
    governor: Arc<RateGovernor>,
    batcher: Arc<AdaptiveBatcher>,
    sot_breaker: Arc<CircuitBreaker>,
    marketplace_breaker: Arc<CircuitBreaker>,
    daily_limit: usize,
    initial_delay: std::time::Duration,
    batch_interval: std::time::Duration,
    progress_path: PathBuf,
    started_at: chrono::DateTime<Utc>,
}

impl BackgroundWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        sot: Box<dyn SotAdapter>,
        marketplace: Box<dyn MarketplaceAdapter>,
        governor: Arc<RateGovernor>,
        batcher: Arc<AdaptiveBatcher>,
        sot_breaker: Arc<CircuitBreaker>,
        marketplace_breaker: Arc<CircuitBreaker>,
        config: &Config,
    ) -> Self {
        let venue = VenueKey::for_store(&store, &config.default_marketplace_base_url);
        let progress_path = config.state_dir.join(format!(".bg-worker-progress-{}.json", store.id));
        let state_store = StateStore::new(&config.state_dir, store.id, config.state_write_mode);
        Self {
            store,
            venue,
            sot,
            marketplace,
            state_store,
            governor,
            batcher,
            sot_breaker,
            marketplace_breaker,
            daily_limit: config.background_daily_limit,
            initial_delay: config.background_initial_delay,
            batch_interval: config.background_batch_interval,
            progress_path,
            started_at: Utc::now(),
        }
    }

    /// Runs forever until `stop` fires. Cooperative: observed between
    /// iterations and between the two push phases within an iteration,
    /// never mid-batch.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(store = self.store.id, delay_secs = self.initial_delay.as_secs(), "background worker waiting initial delay");
        tokio::select! {
            _ = tokio::time::sleep(self.initial_delay) => {}
            _ = stop.changed() => {
                if *stop.borrow() {
                    return;
                }
            }
        }

        loop {
            if *stop.borrow() {
                info!(store = self.store.id, "background worker stopping");
                return;
            }

            if let Err(e) = self.run_iteration(&stop).await {
                warn!(store = self.store.id, error = %e, "background worker iteration failed, will retry next cycle");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.batch_interval) => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        info!(store = self.store.id, "background worker stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn run_iteration(&self, stop: &watch::Receiver<bool>) -> Result<()> {
        let mut state = self.state_store.load().await;

        self.sot_breaker.check().map_err(anyhow::Error::from)?;

        let policy = RetryPolicy::auth();
        let inventory = match retry(&policy, || self.sot.inventory(self.store.id), classify_sot).await {
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
        let details = match retry(&policy, || self.sot.products(&ids), classify_sot).await {
            Ok(details) => {
                self.sot_breaker.on_success();
                details
            }
            Err(e) => {
                self.sot_breaker.on_failure();
                return Err(e).context("fetching SoT product details");
            }
        };
        let view = build_sku_view(&inventory, &details);

        let mut candidates: Vec<&crate::models::SkuView> = view
            .values()
            .filter(|v| {
                state.get(&v.sku).map_or(true, |entry| !entry.synced_to_marketplace)
            })
            .collect();
        candidates.truncate(self.daily_limit);

        let total_items = view.len();
        let synced_items = total_items.saturating_sub(candidates.len());

        if candidates.is_empty() {
            self.write_progress(total_items, synced_items).await;
            return Ok(());
        }

        let item_updates: Vec<ItemUpdate> = candidates
            .iter()
            .map(|v| {
                let (_, enabled, price) = force_zero_if_invalid_price(v);
                ItemUpdate { sku: v.sku.clone(), enabled: Some(enabled), price }
            })
            .collect();
        let inventory_updates: Vec<InventoryUpdate> = candidates
            .iter()
            .map(|v| {
                let (quantity, _, _) = force_zero_if_invalid_price(v);
                InventoryUpdate { sku: v.sku.clone(), inventory: quantity }
            })
            .collect();

        self.push_phase_items(&item_updates, stop).await?;
        self.push_phase_inventory(&inventory_updates, stop).await?;

        for view in &candidates {
            if let Some(entry) = state.get_mut(&view.sku) {
                entry.synced_to_marketplace = true;
            }
        }
        self.state_store.save(&state).await;
        self.write_progress(total_items, synced_items + candidates.len()).await;

        Ok(())
    }

    async fn push_phase_items(&self, updates: &[ItemUpdate], stop: &watch::Receiver<bool>) -> Result<()> {
        let batch_size = self.batcher.batch_size(&self.venue.to_string());
        for chunk in updates.chunks(batch_size.max(1)) {
            if *stop.borrow() {
                return Ok(());
            }
            self.governor.wait_for_turn(&self.venue).await;
            self.push_batch(|| self.marketplace.push_items(&self.store.venue_id, chunk)).await?;
            tokio::time::sleep(self.batcher.recommended_delay(&self.venue.to_string())).await;
        }
        Ok(())
    }

    async fn push_phase_inventory(&self, updates: &[InventoryUpdate], stop: &watch::Receiver<bool>) -> Result<()> {
        let batch_size = self.batcher.batch_size(&self.venue.to_string());
        for chunk in updates.chunks(batch_size.max(1)) {
            if *stop.borrow() {
                return Ok(());
            }
            self.governor.wait_for_turn(&self.venue).await;
            self.push_batch(|| self.marketplace.push_inventory(&self.store.venue_id, chunk)).await?;
            tokio::time::sleep(self.batcher.recommended_delay(&self.venue.to_string())).await;
        }
        Ok(())
    }

    async fn push_batch<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<MarketplaceOutcome>>,
    {
        self.marketplace_breaker.check().map_err(anyhow::Error::from)?;

        let policy = RetryPolicy::marketplace();
        match retry(&policy, &op, classify_marketplace).await {
            Ok(MarketplaceOutcome::Success) => {
                self.marketplace_breaker.on_success();
                self.governor.on_success(&self.venue);
                self.batcher.on_success(&self.venue.to_string());
                Ok(())
            }
            Ok(MarketplaceOutcome::Duplicate) => {
                self.marketplace_breaker.on_success();
                Ok(())
            }
            Err(e) => {
                self.marketplace_breaker.on_failure();
                if let Some(SyncError::MarketplaceRateLimited { retry_after }) = e.downcast_ref::<SyncError>() {
                    self.governor.on_rate_limited(&self.venue, *retry_after);
                    self.batcher.on_rate_limit(&self.venue.to_string());
                }
                Err(e).context("background worker batch push failed")
            }
        }
    }

    async fn write_progress(&self, total_items: usize, synced_items: usize) {
        let remaining = total_items.saturating_sub(synced_items);
        let percent_complete = if total_items == 0 { 100.0 } else { synced_items as f64 / total_items as f64 * 100.0 };
        let days_for_remaining = if self.daily_limit == 0 {
            0.0
        } else {
            remaining as f64 / self.daily_limit as f64
        };

        let report = ProgressReport {
            total_items,
            synced_items,
            remaining_items: remaining,
            percent_complete,
            estimated_days_remaining: days_for_remaining,
            last_sync_at: Utc::now(),
            started_at: self.started_at,
        };

        if let Some(parent) = self.progress_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_vec_pretty(&report) {
            Ok(body) => {
                if let Err(e) = tokio::fs::write(&self.progress_path, body).await {
                    warn!(error = %e, "failed to write background worker progress file");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize background worker progress"),
        }
    }
}

/// Same invalid-price force-zero rule as the sync engine's pipeline
/// step 6: returns `(quantity, enabled, price)`.
fn force_zero_if_invalid_price(view: &crate::models::SkuView) -> (i64, bool, Option<f64>) {
    match view.price {
        Some(p) if p.is_finite() && p >= 0.0 => (view.quantity, view.enabled, view.price),
        _ => (0, false, Some(0.0)),
    }
}

fn classify_sot(err: &anyhow::Error) -> Failure {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::SotAuth(_)) => Failure { retriable: true, retry_after: None },
        _ => Failure { retriable: false, retry_after: None },
    }
}

fn classify_marketplace(err: &anyhow::Error) -> Failure {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::MarketplaceRateLimited { retry_after }) => Failure { retriable: true, retry_after: *retry_after },
        Some(SyncError::MarketplaceServerError { .. }) => Failure { retriable: true, retry_after: None },
        Some(SyncError::MarketplaceTerminal { .. }) => Failure { retriable: false, retry_after: None },
        _ => Failure { retriable: true, retry_after: None },
    }
}
