//! Per-venue request pacing: at most one request per venue crosses the
//! network inside `max(configured minimum, learned minimum)`, and an
//! explicit back-off is honored across process restarts. Generalized
//! from the per-IP keyed map behind a `parking_lot::Mutex` in
//! `middleware::rate_limit::RateLimitLayer` — there keyed by IP and
//! windowed, here keyed by venue and gated on an absolute deadline.

use crate::config::Config;
use crate::models::VenueKey;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PersistedEntry {
    next_allowed_at_ms: i64,
    learned_min_interval_ms: i64,
}

struct Entry {
    next_allowed_at_ms: i64,
    learned_min_interval_ms: i64,
    /// In-memory only — never persisted, reset on every process start.
    last_request_at_ms: i64,
}

/// Process-local; if multiple processes share a venue, concurrent
/// access across them is undefined, by design — see design note §9.
pub struct RateGovernor {
    min_interval_ms: i64,
    learning_enabled: bool,
    learned_cap_ms: i64,
    jitter_ms: i64,
    buffer_ms: i64,
    post_success_enforcement: bool,
    path: PathBuf,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RateGovernor {
    pub fn new(config: &Config) -> Self {
        let path = config.state_dir.join("rate-limits.json");
        let persisted: HashMap<String, PersistedEntry> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        let entries = persisted
            .into_iter()
            .map(|(key, p)| {
                (
                    key,
                    Entry {
                        next_allowed_at_ms: p.next_allowed_at_ms,
                        learned_min_interval_ms: p.learned_min_interval_ms,
                        last_request_at_ms: 0,
                    },
                )
            })
            .collect();

        Self {
            min_interval_ms: config.rate_limit_min_interval.as_millis() as i64,
            learning_enabled: config.rate_limit_learning_enabled,
            learned_cap_ms: config.rate_limit_learned_cap.as_millis() as i64,
            jitter_ms: config.rate_limit_jitter.as_millis() as i64,
            buffer_ms: config.rate_limit_buffer.as_millis() as i64,
            post_success_enforcement: config.rate_limit_post_success_enforcement,
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Sleeps until this venue's gate opens. Callers for the same venue
    /// MUST serialize through this call — the per-venue mutex here is
    /// what makes the computed gate authoritative rather than advisory.
    pub async fn wait_for_turn(&self, venue: &VenueKey) {
        let delay_ms = {
            let mut entries = self.entries.lock();
            let now = Utc::now().timestamp_millis();
            let entry = entries.entry(venue.to_string()).or_insert_with(|| Entry {
                next_allowed_at_ms: now,
                learned_min_interval_ms: 0,
                last_request_at_ms: 0,
            });

            let effective_min = self.min_interval_ms.max(entry.learned_min_interval_ms);
            let gate = entry
                .next_allowed_at_ms
                .max(entry.last_request_at_ms.saturating_add(effective_min));
            let wait = (gate - now).max(0);
            entry.last_request_at_ms = now.max(gate);
            wait
        };

        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
        }
    }

    /// `retry_after` is the parsed `Retry-After` value (seconds or
    /// HTTP-date, already resolved to a duration by the caller). A
    /// non-positive or absent value is a no-op.
    pub fn on_rate_limited(&self, venue: &VenueKey, retry_after: Option<Duration>) {
        let Some(retry_after) = retry_after else { return };
        let retry_after_ms = retry_after.as_millis() as i64;
        if retry_after_ms <= 0 {
            return;
        }

        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };

        {
            let mut entries = self.entries.lock();
            let now = Utc::now().timestamp_millis();
            let entry = entries.entry(venue.to_string()).or_insert_with(|| Entry {
                next_allowed_at_ms: now,
                learned_min_interval_ms: 0,
                last_request_at_ms: now,
            });

            entry.next_allowed_at_ms =
                entry.next_allowed_at_ms.max(now + retry_after_ms + self.buffer_ms + jitter);

            if self.learning_enabled {
                entry.learned_min_interval_ms =
                    entry.learned_min_interval_ms.max(retry_after_ms).min(self.learned_cap_ms);
            }
        }

        self.persist();
    }

    /// Not persisted — success is frequent and the learned interval only
    /// needs to survive a restart, not every successful call.
    pub fn on_success(&self, venue: &VenueKey) {
        if !self.post_success_enforcement {
            return;
        }
        let mut entries = self.entries.lock();
        let now = Utc::now().timestamp_millis();
        let entry = entries.entry(venue.to_string()).or_insert_with(|| Entry {
            next_allowed_at_ms: now,
            learned_min_interval_ms: 0,
            last_request_at_ms: now,
        });
        let effective_min = self.min_interval_ms.max(entry.learned_min_interval_ms);
        entry.next_allowed_at_ms = entry.next_allowed_at_ms.max(now + effective_min);
    }

    fn persist(&self) {
        let snapshot: HashMap<String, PersistedEntry> = self
            .entries
            .lock()
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    PersistedEntry {
                        next_allowed_at_ms: v.next_allowed_at_ms,
                        learned_min_interval_ms: v.learned_min_interval_ms,
                    },
                )
            })
            .collect();

        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&self.path, body) {
                    warn!(error = %e, "failed to persist rate governor state");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize rate governor state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Store;
    use tempfile::TempDir;

    fn config_with_dir(dir: &std::path::Path) -> Config {
        Config {
            stores: vec![],
            default_marketplace_base_url: "https://mp.example.com".into(),
            default_sot_base_url: "https://sot.example.com".into(),
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
            adaptive_increase_threshold: 5,
            adaptive_increase_rate: 1.5,
            adaptive_decrease_rate: 0.5,
            rate_limit_min_interval: Duration::from_millis(50),
            rate_limit_learning_enabled: true,
            rate_limit_learned_cap: Duration::from_secs(5),
            rate_limit_jitter: Duration::from_millis(0),
            rate_limit_buffer: Duration::from_millis(10),
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

    fn venue() -> VenueKey {
        VenueKey::for_store(
            &Store {
                id: 1,
                name: "s".into(),
                venue_id: "v1".into(),
                username: "user".into(),
                password: "pw".into(),
                base_url: None,
                enabled: true,
            },
            "https://mp.example.com",
        )
    }

    #[tokio::test]
    async fn first_call_for_a_venue_does_not_wait() {
        let dir = TempDir::new().unwrap();
        let governor = RateGovernor::new(&config_with_dir(dir.path()));
        let start = std::time::Instant::now();
        governor.wait_for_turn(&venue()).await;
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn rate_limited_delays_the_next_call_by_at_least_retry_after_plus_buffer() {
        let dir = TempDir::new().unwrap();
        let governor = RateGovernor::new(&config_with_dir(dir.path()));
        let v = venue();

        governor.wait_for_turn(&v).await;
        governor.on_rate_limited(&v, Some(Duration::from_millis(80)));

        let start = std::time::Instant::now();
        governor.wait_for_turn(&v).await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn rate_limit_state_survives_across_instances_via_the_persisted_file() {
        let dir = TempDir::new().unwrap();
        let v = venue();
        {
            let governor = RateGovernor::new(&config_with_dir(dir.path()));
            governor.wait_for_turn(&v).await;
            governor.on_rate_limited(&v, Some(Duration::from_millis(150)));
        }

        let governor = RateGovernor::new(&config_with_dir(dir.path()));
        let start = std::time::Instant::now();
        governor.wait_for_turn(&v).await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
