//! Process configuration. Loaded once at startup via [`Config::from_env`]
//! and threaded through to every component as a constructed value —
//! never looked up from a global, per design note §9.

use crate::models::Store;
use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub stores: Vec<Store>,
    pub default_marketplace_base_url: String,
    pub default_sot_base_url: String,

    pub state_dir: std::path::PathBuf,
    pub state_write_mode: StateWriteMode,

    pub sync_interval: Duration,

    pub first_sync_batch_size: usize,
    pub first_sync_batch_delay: Duration,
    pub delta_batch_size: usize,
    pub delta_batch_delay: Duration,
    pub phase_pause: Duration,

    pub adaptive_min_batch: usize,
    pub adaptive_max_batch: usize,
    pub adaptive_initial_batch: usize,
    pub adaptive_increase_threshold: u32,
    pub adaptive_increase_rate: f64,
    pub adaptive_decrease_rate: f64,

    pub rate_limit_min_interval: Duration,
    pub rate_limit_learning_enabled: bool,
    pub rate_limit_learned_cap: Duration,
    pub rate_limit_jitter: Duration,
    pub rate_limit_buffer: Duration,
    pub rate_limit_post_success_enforcement: bool,

    pub background_daily_limit: usize,
    pub background_initial_delay: Duration,
    pub background_batch_interval: Duration,

    pub priority_limit: usize,
    pub priority_in_stock_weight: u32,
    pub priority_high_stock_weight: u32,
    pub priority_high_stock_threshold: i64,
    pub priority_low_stock_weight: u32,
    pub priority_low_stock_threshold: i64,
    pub priority_high_value_weight: u32,
    pub priority_high_value_threshold: f64,

    pub health_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateWriteMode {
    Atomic,
    Direct,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let stores_path = env_or("STORES_CONFIG_PATH", "config/stores.json");
        let stores = load_stores(&stores_path)
            .with_context(|| format!("failed to load store roster from {stores_path}"))?;

        let state_write_mode = match env_or("STATE_WRITE_MODE", "atomic").as_str() {
            "direct" => StateWriteMode::Direct,
            _ => StateWriteMode::Atomic,
        };

        Ok(Self {
            stores,
            default_marketplace_base_url: env_or(
                "MARKETPLACE_BASE_URL",
                "https://marketplace.example.com",
            ),
            default_sot_base_url: env_or("SOT_BASE_URL", "https://sot.example.com"),

            state_dir: std::path::PathBuf::from(env_or("STATE_DIR", "state")),
            state_write_mode,

            sync_interval: Duration::from_secs(num("SYNC_INTERVAL_MINUTES", 20) as u64 * 60),

            first_sync_batch_size: num("FIRST_SYNC_BATCH_SIZE", 10) as usize,
            first_sync_batch_delay: secs("FIRST_SYNC_BATCH_DELAY_SECONDS", 5),
            delta_batch_size: num("DELTA_BATCH_SIZE", 100) as usize,
            delta_batch_delay: secs("DELTA_BATCH_DELAY_SECONDS", 1),
            phase_pause: secs("PHASE_PAUSE_SECONDS", 2),

            adaptive_min_batch: num("ADAPTIVE_MIN_BATCH", 10) as usize,
            adaptive_max_batch: num("ADAPTIVE_MAX_BATCH", 200) as usize,
            adaptive_initial_batch: num("ADAPTIVE_INITIAL_BATCH", 25) as usize,
            adaptive_increase_threshold: num("ADAPTIVE_INCREASE_THRESHOLD", 5) as u32,
            adaptive_increase_rate: float("ADAPTIVE_INCREASE_RATE", 1.5),
            adaptive_decrease_rate: float("ADAPTIVE_DECREASE_RATE", 0.5),

            rate_limit_min_interval: secs("RATE_LIMIT_MIN_INTERVAL_SECONDS", 1),
            rate_limit_learning_enabled: boolean("RATE_LIMIT_LEARNING_ENABLED", true),
            rate_limit_learned_cap: secs("RATE_LIMIT_LEARNED_CAP_SECONDS", 1800),
            rate_limit_jitter: secs("RATE_LIMIT_JITTER_SECONDS", 2),
            rate_limit_buffer: secs("RATE_LIMIT_BUFFER_SECONDS", 1),
            rate_limit_post_success_enforcement: boolean(
                "RATE_LIMIT_POST_SUCCESS_ENFORCEMENT",
                false,
            ),

            background_daily_limit: num("BACKGROUND_DAILY_LIMIT", 500) as usize,
            background_initial_delay: secs("BACKGROUND_INITIAL_DELAY_SECONDS", 3600),
            background_batch_interval: secs("BACKGROUND_BATCH_INTERVAL_SECONDS", 86_400),

            priority_limit: num("PRIORITY_LIMIT", 500) as usize,
            priority_in_stock_weight: num("PRIORITY_IN_STOCK_WEIGHT", 100) as u32,
            priority_high_stock_weight: num("PRIORITY_HIGH_STOCK_WEIGHT", 20) as u32,
            priority_high_stock_threshold: num("PRIORITY_HIGH_STOCK_THRESHOLD", 50) as i64,
            priority_low_stock_weight: num("PRIORITY_LOW_STOCK_WEIGHT", 10) as u32,
            priority_low_stock_threshold: num("PRIORITY_LOW_STOCK_THRESHOLD", 5) as i64,
            priority_high_value_weight: num("PRIORITY_HIGH_VALUE_WEIGHT", 15) as u32,
            priority_high_value_threshold: float("PRIORITY_HIGH_VALUE_THRESHOLD", 50.0),

            health_port: num("HEALTH_PORT", 8080) as u16,
        })
    }

    pub fn enabled_stores(&self) -> impl Iterator<Item = &Store> {
        self.stores.iter().filter(|s| s.enabled)
    }
}

fn load_stores(path: &str) -> Result<Vec<Store>> {
    if !std::path::Path::new(path).exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let stores: Vec<Store> = serde_json::from_str(&raw)?;
    Ok(stores)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn num(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn float(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn boolean(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default))
}
