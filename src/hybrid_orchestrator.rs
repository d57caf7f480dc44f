//! Single-shot initialization for a store with no prior state: write
//! the initial snapshot straight to disk, introspect the marketplace
//! best-effort, push the highest-priority SKUs, then hand off to a
//! [`crate::background_worker::BackgroundWorker`] for the long tail.

use crate::adapters::{ItemUpdate, InventoryUpdate, MarketplaceAdapter, MarketplaceOutcome, SotAdapter};
use crate::background_worker::BackgroundWorker;
use crate::batcher::AdaptiveBatcher;
use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::SyncError;
use crate::governor::RateGovernor;
use crate::models::{build_sku_view, Store, StateEntry, StateMap, VenueKey};
use crate::priority::{score, top_n};
use crate::retry::{retry, Failure, RetryPolicy};
use crate::state::StateStore;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HybridInitOutcome {
    Initialized,
    AlreadyInitialized,
}

pub struct HybridOrchestrator {
    store: Store,
    venue: VenueKey,
    sot: Box<dyn SotAdapter>,
    marketplace: Box<dyn MarketplaceAdapter>,
    state_store: StateStore,
    governor: Arc<RateGovernor>,
    batcher: Arc<AdaptiveBatcher>,
    sot_breaker: Arc<CircuitBreaker>,
    marketplace_breaker: Arc<CircuitBreaker>,
    priority_limit: usize,
    config: Config,
}

impl HybridOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        sot: Box<dyn SotAdapter>,
        marketplace: Box<dyn MarketplaceAdapter>,
        governor: Arc<RateGovernor>,
        batcher: Arc<AdaptiveBatcher>,
        sot_breaker: Arc<CircuitBreaker>,
        marketplace_breaker: Arc<CircuitBreaker>,
        config: Config,
    ) -> Self {
        let venue = VenueKey::for_store(&store, &config.default_marketplace_base_url);
        let state_store = StateStore::new(&config.state_dir, store.id, config.state_write_mode);
        let priority_limit = config.priority_limit;
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
            priority_limit,
            config,
        }
    }

    /// Returns `AlreadyInitialized` without touching anything if state
    /// for this store already exists.
    pub async fn initialize(&self) -> Result<HybridInitOutcome> {
        if self.state_store.exists().await {
            info!(store = self.store.id, "state already exists, hybrid init is a no-op");
            return Ok(HybridInitOutcome::AlreadyInitialized);
        }

        self.sot_breaker.check().map_err(anyhow::Error::from)?;

        let policy = RetryPolicy::auth();
        let inventory = match retry(&policy, || self.sot.inventory(self.store.id), classify_sot).await {
            Ok(records) => {
                self.sot_breaker.on_success();
                records
            }
            Err(e) => {
                self.sot_breaker.on_failure();
                return Err(e).context("fetching SoT inventory for bootstrap");
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
                return Err(e).context("fetching SoT product details for bootstrap");
            }
        };
        let view = build_sku_view(&inventory, &details);

        let mut state: StateMap = view
            .values()
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
            .collect();
        info!(store = self.store.id, skus = state.len(), "bootstrap snapshot written");

        self.introspect_marketplace(&mut state).await;

        let scored: Vec<_> = view.values().map(|v| score(v, &self.config)).collect();
        let top = top_n(scored, self.priority_limit);
        info!(store = self.store.id, priority_candidates = top.len(), "priority push candidates selected");

        if !top.is_empty() {
            let selected: std::collections::HashSet<&str> = top.iter().map(|s| s.sku.as_str()).collect();
            let item_updates: Vec<ItemUpdate> = view
                .values()
                .filter(|v| selected.contains(v.sku.as_str()))
                .map(|v| {
                    let (_, enabled, price) = force_zero_if_invalid_price(v);
                    ItemUpdate { sku: v.sku.clone(), enabled: Some(enabled), price }
                })
                .collect();
            let inventory_updates: Vec<InventoryUpdate> = view
                .values()
                .filter(|v| selected.contains(v.sku.as_str()))
                .map(|v| {
                    let (quantity, _, _) = force_zero_if_invalid_price(v);
                    InventoryUpdate { sku: v.sku.clone(), inventory: quantity }
                })
                .collect();

            self.push_batches(&item_updates, |batch| self.marketplace.push_items(&self.store.venue_id, batch)).await?;
            tokio::time::sleep(self.config.phase_pause).await;
            self.push_batches(&inventory_updates, |batch| self.marketplace.push_inventory(&self.store.venue_id, batch)).await?;

            for sku in &selected {
                if let Some(entry) = state.get_mut(*sku) {
                    entry.synced_to_marketplace = true;
                }
            }
        }

        self.state_store.save(&state).await;
        Ok(HybridInitOutcome::Initialized)
    }

    /// Best-effort per spec: 404/405 means unsupported, treated the same
    /// as any other non-2xx — log and move on, never fail the init.
    async fn introspect_marketplace(&self, state: &mut StateMap) {
        match self.marketplace.list_items(&self.store.venue_id).await {
            Ok(skus) => {
                let mut marked = 0;
                for sku in skus {
                    if let Some(entry) = state.get_mut(&sku) {
                        entry.synced_to_marketplace = true;
                        marked += 1;
                    }
                }
                info!(store = self.store.id, marked, "marketplace introspection complete");
            }
            Err(e) => warn!(store = self.store.id, error = %e, "marketplace introspection failed, continuing"),
        }
    }

    async fn push_batches<T, F, Fut>(&self, items: &[T], op: F) -> Result<()>
    where
        F: Fn(&[T]) -> Fut,
        Fut: std::future::Future<Output = Result<MarketplaceOutcome>>,
    {
        let batch_size = self.config.first_sync_batch_size.max(1);
        for chunk in items.chunks(batch_size) {
            self.marketplace_breaker.check().map_err(anyhow::Error::from)?;
            self.governor.wait_for_turn(&self.venue).await;
            let policy = RetryPolicy::marketplace();
            match retry(&policy, || op(chunk), classify_marketplace).await {
                Ok(MarketplaceOutcome::Success) => {
                    self.marketplace_breaker.on_success();
                    self.governor.on_success(&self.venue);
                    self.batcher.on_success(&self.venue.to_string());
                }
                Ok(MarketplaceOutcome::Duplicate) => {
                    self.marketplace_breaker.on_success();
                }
                Err(e) => {
                    self.marketplace_breaker.on_failure();
                    if let Some(SyncError::MarketplaceRateLimited { retry_after }) = e.downcast_ref::<SyncError>() {
                        self.governor.on_rate_limited(&self.venue, *retry_after);
                        self.batcher.on_rate_limit(&self.venue.to_string());
                    }
                    return Err(e).context("priority push batch failed");
                }
            }
            tokio::time::sleep(self.config.first_sync_batch_delay).await;
        }
        Ok(())
    }

    /// Consumes the orchestrator to spawn a non-blocking background
    /// worker for the remainder, returning its stop handle.
    pub fn start_background_worker(self) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
        let worker = BackgroundWorker::new(
            self.store,
            self.sot,
            self.marketplace,
            self.governor,
            self.batcher,
            self.sot_breaker,
            self.marketplace_breaker,
            &self.config,
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(stop_rx));
        (handle, stop_tx)
    }
}

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
