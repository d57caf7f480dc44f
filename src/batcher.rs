//! Per-venue adaptive batch sizing: grows the batch multiplicatively on
//! a run of successes, shrinks it on a rate limit. Same keyed-map shape
//! as [`crate::governor::RateGovernor`], with the clamped-update
//! arithmetic mirrored from the scrapers' `execute_with_retry` backoff
//! (`(delay * factor).min(cap)`-style steps) applied to batch size
//! instead of delay.

use crate::config::Config;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct VenueState {
    current_batch_size: usize,
    success_streak: u32,
    failure_streak: u32,
    last_rate_limit_at_ms: Option<i64>,
    total_batches: u64,
}

pub struct AdaptiveBatcher {
    min: usize,
    max: usize,
    initial: usize,
    increase_threshold: u32,
    increase_rate: f64,
    decrease_rate: f64,
    conservative_delay: Duration,
    nominal_delay: Duration,
    path: PathBuf,
    entries: Mutex<HashMap<String, VenueState>>,
}

impl AdaptiveBatcher {
    pub fn new(config: &Config) -> Self {
        let path = config.state_dir.join("adaptive-batch.json");
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        Self {
            min: config.adaptive_min_batch,
            max: config.adaptive_max_batch,
            initial: config.adaptive_initial_batch,
            increase_threshold: config.adaptive_increase_threshold,
            increase_rate: config.adaptive_increase_rate,
            decrease_rate: config.adaptive_decrease_rate,
            // Delta delay is the nominal steady-state pace; first-sync
            // delay is the conservative pace used right after a 429.
            conservative_delay: config.first_sync_batch_delay,
            nominal_delay: config.delta_batch_delay,
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn batch_size(&self, venue_key: &str) -> usize {
        self.entries
            .lock()
            .get(venue_key)
            .map(|s| s.current_batch_size)
            .unwrap_or(self.initial)
    }

    pub fn recommended_delay(&self, venue_key: &str) -> Duration {
        let entries = self.entries.lock();
        let Some(state) = entries.get(venue_key) else {
            return self.nominal_delay;
        };
        match state.last_rate_limit_at_ms {
            Some(at) if Utc::now().timestamp_millis() - at < Duration::from_secs(300).as_millis() as i64 => {
                self.conservative_delay
            }
            _ => self.nominal_delay,
        }
    }

    pub fn on_success(&self, venue_key: &str) {
        let mut entries = self.entries.lock();
        let state = entries.entry(venue_key.to_string()).or_insert_with(|| self.initial_state());
        state.success_streak += 1;
        state.failure_streak = 0;
        state.total_batches += 1;

        let mut should_persist = false;
        if state.success_streak >= self.increase_threshold {
            let grown = (state.current_batch_size as f64 * self.increase_rate).floor() as usize;
            state.current_batch_size = grown.min(self.max);
            state.success_streak = 0;
            should_persist = true;
        }
        drop(entries);
        if should_persist {
            self.persist();
        }
    }

    pub fn on_rate_limit(&self, venue_key: &str) {
        {
            let mut entries = self.entries.lock();
            let state = entries.entry(venue_key.to_string()).or_insert_with(|| self.initial_state());
            state.success_streak = 0;
            state.failure_streak += 1;
            let shrunk = (state.current_batch_size as f64 * self.decrease_rate).floor() as usize;
            state.current_batch_size = shrunk.max(self.min);
            state.last_rate_limit_at_ms = Some(Utc::now().timestamp_millis());
            state.total_batches += 1;
        }
        self.persist();
    }

    fn initial_state(&self) -> VenueState {
        VenueState {
            current_batch_size: self.initial,
            success_streak: 0,
            failure_streak: 0,
            last_rate_limit_at_ms: None,
            total_batches: 0,
        }
    }

    fn persist(&self) {
        let snapshot = self.entries.lock().clone();
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&self.path, body) {
                    warn!(error = %e, "failed to persist adaptive batcher state");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize adaptive batcher state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_with_dir(dir: &std::path::Path) -> Config {
        Config {
            stores: vec![],
            default_marketplace_base_url: String::new(),
            default_sot_base_url: String::new(),
            state_dir: dir.to_path_buf(),
            state_write_mode: crate::config::StateWriteMode::Atomic,
            sync_interval: Duration::from_secs(900),
            first_sync_batch_size: 10,
            first_sync_batch_delay: Duration::from_secs(5),
            delta_batch_size: 100,
            delta_batch_delay: Duration::from_secs(1),
            phase_pause: Duration::from_secs(2),
            adaptive_min_batch: 10,
            adaptive_max_batch: 200,
            adaptive_initial_batch: 25,
            adaptive_increase_threshold: 3,
            adaptive_increase_rate: 1.5,
            adaptive_decrease_rate: 0.5,
            rate_limit_min_interval: Duration::from_secs(1),
            rate_limit_learning_enabled: true,
            rate_limit_learned_cap: Duration::from_secs(1800),
            rate_limit_jitter: Duration::from_secs(2),
            rate_limit_buffer: Duration::from_secs(1),
            rate_limit_post_success_enforcement: false,
            background_daily_limit: 500,
            background_initial_delay: Duration::from_secs(3600),
            background_batch_interval: Duration::from_secs(86_400),
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

    #[test]
    fn unknown_venue_starts_at_configured_initial_size() {
        let dir = TempDir::new().unwrap();
        let batcher = AdaptiveBatcher::new(&config_with_dir(dir.path()));
        assert_eq!(batcher.batch_size("v1"), 25);
    }

    #[test]
    fn batch_size_grows_after_increase_threshold_successes() {
        let dir = TempDir::new().unwrap();
        let batcher = AdaptiveBatcher::new(&config_with_dir(dir.path()));
        batcher.on_success("v1");
        batcher.on_success("v1");
        assert_eq!(batcher.batch_size("v1"), 25);
        batcher.on_success("v1");
        assert_eq!(batcher.batch_size("v1"), 37); // floor(25 * 1.5)
    }

    #[test]
    fn batch_size_never_exceeds_configured_max() {
        let dir = TempDir::new().unwrap();
        let batcher = AdaptiveBatcher::new(&config_with_dir(dir.path()));
        for _ in 0..200 {
            batcher.on_success("v1");
        }
        assert_eq!(batcher.batch_size("v1"), 200);
    }

    #[test]
    fn rate_limit_shrinks_batch_size_but_never_below_min() {
        let dir = TempDir::new().unwrap();
        let batcher = AdaptiveBatcher::new(&config_with_dir(dir.path()));
        batcher.on_rate_limit("v1");
        assert_eq!(batcher.batch_size("v1"), 12); // floor(25 * 0.5)
        for _ in 0..10 {
            batcher.on_rate_limit("v1");
        }
        assert_eq!(batcher.batch_size("v1"), 10);
    }

    #[test]
    fn recommended_delay_is_conservative_shortly_after_a_rate_limit() {
        let dir = TempDir::new().unwrap();
        let batcher = AdaptiveBatcher::new(&config_with_dir(dir.path()));
        batcher.on_rate_limit("v1");
        assert_eq!(batcher.recommended_delay("v1"), Duration::from_secs(5));
    }

    #[test]
    fn recommended_delay_is_nominal_for_an_unseen_venue() {
        let dir = TempDir::new().unwrap();
        let batcher = AdaptiveBatcher::new(&config_with_dir(dir.path()));
        assert_eq!(batcher.recommended_delay("v1"), Duration::from_secs(1));
    }
}
