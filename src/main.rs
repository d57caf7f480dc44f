//! Catalog Sync Engine — operator entrypoint.
//!
//! Subcommands mirror the documented operator surface exactly; with no
//! subcommand the process runs the scheduler loop and the health/metrics
//! HTTP server until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use catalog_sync_engine::config::Config;
use catalog_sync_engine::http::{router, AppState};
use catalog_sync_engine::hybrid_orchestrator::HybridOrchestrator;
use catalog_sync_engine::scheduler::{force_full_request, Scheduler};
use catalog_sync_engine::sync_engine::RunRequest;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "catalog-sync", about = "Marketplace catalog sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync for a single store and exit.
    Sync {
        #[arg(long)]
        store: i64,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        force_full: bool,
    },
    /// Write the initial state snapshot for a store without pushing
    /// anything to the marketplace.
    Bootstrap {
        #[arg(long)]
        store: Option<i64>,
        #[arg(long)]
        all: bool,
    },
    /// Run the full hybrid init flow (bootstrap, introspect, priority
    /// push, start background worker) for a store with no prior state.
    HybridInit {
        #[arg(long)]
        store: i64,
    },
    /// List configured stores and whether they're enabled.
    ListStores,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Some(Command::Sync { store, dry_run, limit, force_full }) => {
            run_sync_command(config, store, dry_run, limit, force_full).await
        }
        Some(Command::Bootstrap { store, all }) => run_bootstrap_command(config, store, all).await,
        Some(Command::HybridInit { store }) => run_hybrid_init_command(config, store).await,
        Some(Command::ListStores) => {
            for s in &config.stores {
                println!("{}\t{}\t{}\tenabled={}", s.id, s.name, s.venue_id, s.enabled);
            }
            Ok(())
        }
        None => run_server(config).await,
    }
}

async fn run_sync_command(
    config: Config,
    store_id: i64,
    dry_run: bool,
    limit: Option<usize>,
    force_full: bool,
) -> Result<()> {
    let scheduler = Scheduler::new(config);
    let request = if force_full {
        RunRequest { dry_run, ..force_full_request(limit) }
    } else {
        RunRequest { dry_run, limit, ..Default::default() }
    };

    let report = scheduler.run_single_store(store_id, request).await?;
    info!(
        items_pushed = report.items_pushed,
        inventory_pushed = report.inventory_pushed,
        mode = ?report.mode_used,
        "sync complete"
    );
    Ok(())
}

async fn run_bootstrap_command(config: Config, store: Option<i64>, all: bool) -> Result<()> {
    let targets: Vec<_> = match (store, all) {
        (_, true) => config.stores.iter().filter(|s| s.enabled).cloned().collect(),
        (Some(id), false) => config.stores.iter().filter(|s| s.id == id).cloned().collect(),
        (None, false) => anyhow::bail!("bootstrap requires --store <id> or --all"),
    };

    if targets.is_empty() {
        anyhow::bail!("no matching store(s) found for bootstrap");
    }

    for store in targets {
        let scheduler = Scheduler::new(config.clone());
        let request = RunRequest { mode: catalog_sync_engine::sync_engine::SyncMode::Bootstrap, ..Default::default() };
        scheduler.run_single_store(store.id, request).await?;
        info!(store = store.id, "bootstrap complete");
    }
    Ok(())
}

async fn run_hybrid_init_command(config: Config, store_id: i64) -> Result<()> {
    let store = config
        .stores
        .iter()
        .find(|s| s.id == store_id)
        .cloned()
        .with_context(|| format!("no configured store with id {store_id}"))?;

    let sot_base_url = store.base_url.clone().unwrap_or_else(|| config.default_sot_base_url.clone());
    let mp_base_url = store.base_url.clone().unwrap_or_else(|| config.default_marketplace_base_url.clone());
    let sot = Box::new(catalog_sync_engine::adapters::HttpSotAdapter::new(
        sot_base_url,
        store.username.clone(),
        store.password.clone(),
    ));
    let marketplace = Box::new(catalog_sync_engine::adapters::HttpMarketplaceAdapter::new(
        mp_base_url,
        store.username.clone(),
        store.password.clone(),
    ));
    let governor = Arc::new(catalog_sync_engine::governor::RateGovernor::new(&config));
    let batcher = Arc::new(catalog_sync_engine::batcher::AdaptiveBatcher::new(&config));
    let sot_breaker = Arc::new(catalog_sync_engine::breaker::CircuitBreaker::for_sot());
    let marketplace_breaker = Arc::new(catalog_sync_engine::breaker::CircuitBreaker::for_marketplace());

    let orchestrator = HybridOrchestrator::new(
        store,
        sot,
        marketplace,
        governor,
        batcher,
        sot_breaker,
        marketplace_breaker,
        config,
    );
    let outcome = orchestrator.initialize().await?;
    info!(?outcome, "hybrid init complete");

    let (handle, _stop_tx) = orchestrator.start_background_worker();
    info!("background worker started, process will now run the standard server loop");
    drop(handle);
    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    let health_port = config.health_port;
    let scheduler = Arc::new(Scheduler::new(config));

    let app_state = AppState { scheduler: scheduler.clone() };
    let app = router(app_state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], health_port));
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding health/metrics listener")?;
    info!(%addr, "health/metrics server listening");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>());

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "health/metrics server exited with error");
            }
        }
        _ = scheduler.run_forever() => {}
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping sweep loop and server");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_sync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
