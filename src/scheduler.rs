//! Top-level driver: validates configuration, then runs a periodic
//! sequential sweep across enabled stores. One [`SyncEngine`] run per
//! store per sweep; sweeps never overlap and a slow store never blocks
//! the others beyond its own turn, by construction (the loop is
//! sequential, not fanned out — per design note on the ~70k-product
//! working-set-per-store memory constraint).

use crate::adapters::{HttpMarketplaceAdapter, HttpSotAdapter, MarketplaceAdapter, SotAdapter};
use crate::batcher::AdaptiveBatcher;
use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::SyncError;
use crate::governor::RateGovernor;
use crate::models::Store;
use crate::sync_engine::{RunRequest, SyncEngine, SyncMode};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub outcome: SweepOutcome,
    pub succeeded: Vec<i64>,
    pub failed: Vec<i64>,
}

/// One breaker pair per venue, not per store — several stores can share
/// a venue's marketplace account, and the breaker protects the
/// dependency, not the store.
struct VenueBreakers {
    sot: Arc<CircuitBreaker>,
    marketplace: Arc<CircuitBreaker>,
}

pub struct Scheduler {
    config: Config,
    governor: Arc<RateGovernor>,
    batcher: Arc<AdaptiveBatcher>,
    breakers: Mutex<HashMap<String, VenueBreakers>>,
    sweep_running: Mutex<bool>,
}

impl Scheduler {
    pub fn new(config: Config) -> Self {
        Self {
            governor: Arc::new(RateGovernor::new(&config)),
            batcher: Arc::new(AdaptiveBatcher::new(&config)),
            breakers: Mutex::new(HashMap::new()),
            sweep_running: Mutex::new(false),
            config,
        }
    }

    /// Validates the loaded roster, returning the enabled stores or an
    /// empty list. Never fails the process — an empty roster is a
    /// documented degraded/disabled health state, not a crash.
    pub fn enabled_stores(&self) -> Vec<Store> {
        let enabled: Vec<Store> = self.config.enabled_stores().cloned().collect();
        if enabled.is_empty() {
            warn!("no enabled stores configured, scheduler is idle");
        }
        enabled
    }

    fn breakers_for(&self, venue_key: &str) -> (Arc<CircuitBreaker>, Arc<CircuitBreaker>) {
        let mut breakers = self.breakers.lock();
        let entry = breakers.entry(venue_key.to_string()).or_insert_with(|| VenueBreakers {
            sot: Arc::new(CircuitBreaker::for_sot()),
            marketplace: Arc::new(CircuitBreaker::for_marketplace()),
        });
        (entry.sot.clone(), entry.marketplace.clone())
    }

    fn build_engine(&self, store: Store) -> SyncEngine {
        let venue_key = crate::models::VenueKey::for_store(&store, &self.config.default_marketplace_base_url)
            .to_string();
        let (sot_breaker, marketplace_breaker) = self.breakers_for(&venue_key);

        let sot_base_url = store
            .base_url
            .clone()
            .unwrap_or_else(|| self.config.default_sot_base_url.clone());
        let mp_base_url = store
            .base_url
            .clone()
            .unwrap_or_else(|| self.config.default_marketplace_base_url.clone());

        let sot: Box<dyn SotAdapter> =
            Box::new(HttpSotAdapter::new(sot_base_url, store.username.clone(), store.password.clone()));
        let marketplace: Box<dyn MarketplaceAdapter> =
            Box::new(HttpMarketplaceAdapter::new(mp_base_url, store.username.clone(), store.password.clone()));

        SyncEngine::new(
            store,
            sot,
            marketplace,
            self.governor.clone(),
            self.batcher.clone(),
            sot_breaker,
            marketplace_breaker,
            self.config.clone(),
        )
    }

    /// Runs one sweep across all enabled stores sequentially. Skips
    /// (returns `None`) if a previous sweep is still in flight.
    pub async fn run_sweep(&self) -> Option<SweepReport> {
        {
            let mut running = self.sweep_running.lock();
            if *running {
                warn!("previous sweep still running, skipping this tick");
                return None;
            }
            *running = true;
        }

        let stores = self.enabled_stores();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for store in stores {
            let store_id = store.id;
            let engine = self.build_engine(store);
            match engine.run(RunRequest::default()).await {
                Ok(report) => {
                    info!(store = store_id, items = report.items_pushed, inventory = report.inventory_pushed, "store sync succeeded");
                    succeeded.push(store_id);
                }
                Err(e) => {
                    let dependency = e.downcast_ref::<SyncError>().map(|se| se.dependency());
                    error!(store = store_id, error = %e, ?dependency, "store sync failed, continuing sweep");
                    failed.push(store_id);
                }
            }
        }

        *self.sweep_running.lock() = false;

        let outcome = if failed.is_empty() {
            SweepOutcome::Success
        } else if succeeded.is_empty() {
            SweepOutcome::Error
        } else {
            SweepOutcome::Partial
        };

        Some(SweepReport { outcome, succeeded, failed })
    }

    /// Runs a single store outside the normal sweep cadence — used by
    /// the `sync --store <id>` CLI command and the loopback-gated
    /// `/trigger-sync` HTTP endpoint.
    pub async fn run_single_store(&self, store_id: i64, request: RunRequest) -> Result<crate::sync_engine::RunReport> {
        let store = self
            .config
            .stores
            .iter()
            .find(|s| s.id == store_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no configured store with id {store_id}"))?;
        let engine = self.build_engine(store);
        engine.run(request).await
    }

    /// Starts the periodic sweep loop; runs until the process exits or
    /// the caller drops this future (graceful shutdown is handled by the
    /// caller selecting against a shutdown signal around this call).
    pub async fn run_forever(&self) {
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        loop {
            ticker.tick().await;
            if let Some(report) = self.run_sweep().await {
                info!(?report.outcome, succeeded = report.succeeded.len(), failed = report.failed.len(), "sweep complete");
            }
        }
    }
}

/// Force-full convenience used by the `bootstrap`/CLI paths, distinct
/// from the scheduled default-mode sweep.
pub fn force_full_request(limit: Option<usize>) -> RunRequest {
    RunRequest { mode: SyncMode::ForceFull, limit, dry_run: false }
}
