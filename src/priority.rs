//! Pure SKU priority scoring for the initial bootstrap push. No internal
//! state — every function takes a [`SkuView`] and the relevant config
//! weights and returns a value, which keeps this trivial to unit-test.

use crate::config::Config;
use crate::models::{PriorityScore, ScoreReason, SkuView};

pub fn score(view: &SkuView, config: &Config) -> PriorityScore {
    if !view.price.map_or(false, |p| p.is_finite() && p >= 0.0) {
        return PriorityScore {
            sku: view.sku.clone(),
            score: 0,
            reason: Some(ScoreReason::InvalidPrice),
        };
    }

    if view.quantity == 0 {
        return PriorityScore {
            sku: view.sku.clone(),
            score: 0,
            reason: Some(ScoreReason::OutOfStock),
        };
    }

    let mut total = config.priority_in_stock_weight;
    if view.quantity >= config.priority_high_stock_threshold {
        total += config.priority_high_stock_weight;
    }
    if view.quantity <= config.priority_low_stock_threshold {
        total += config.priority_low_stock_weight;
    }
    if view.price.unwrap() >= config.priority_high_value_threshold {
        total += config.priority_high_value_weight;
    }

    PriorityScore {
        sku: view.sku.clone(),
        score: total,
        reason: None,
    }
}

/// Highest-scored `limit` entries, after dropping every zero-score entry.
/// Stable on ties — insertion order from `scored` is preserved.
pub fn top_n(scored: Vec<PriorityScore>, limit: usize) -> Vec<PriorityScore> {
    let mut syncable: Vec<PriorityScore> = scored.into_iter().filter(|s| s.score > 0).collect();
    syncable.sort_by(|a, b| b.score.cmp(&a.score));
    syncable.truncate(limit);
    syncable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config() -> Config {
        Config {
            stores: vec![],
            default_marketplace_base_url: String::new(),
            default_sot_base_url: String::new(),
            state_dir: "state".into(),
            state_write_mode: crate::config::StateWriteMode::Atomic,
            sync_interval: std::time::Duration::from_secs(900),
            first_sync_batch_size: 10,
            first_sync_batch_delay: std::time::Duration::from_secs(5),
            delta_batch_size: 100,
            delta_batch_delay: std::time::Duration::from_secs(1),
            phase_pause: std::time::Duration::from_secs(2),
            adaptive_min_batch: 10,
            adaptive_max_batch: 200,
            adaptive_initial_batch: 25,
            adaptive_increase_threshold: 5,
            adaptive_increase_rate: 1.5,
            adaptive_decrease_rate: 0.5,
            rate_limit_min_interval: std::time::Duration::from_secs(1),
            rate_limit_learning_enabled: true,
            rate_limit_learned_cap: std::time::Duration::from_secs(1800),
            rate_limit_jitter: std::time::Duration::from_secs(2),
            rate_limit_buffer: std::time::Duration::from_secs(1),
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

    fn view(sku: &str, quantity: i64, price: Option<f64>) -> SkuView {
        SkuView { sku: sku.to_string(), quantity, price, enabled: quantity > 0 }
    }

    #[test]
    fn invalid_price_scores_zero_with_reason() {
        let result = score(&view("A", 10, None), &config());
        assert_eq!(result.score, 0);
        assert_eq!(result.reason, Some(ScoreReason::InvalidPrice));
    }

    #[test]
    fn out_of_stock_scores_zero_with_reason() {
        let result = score(&view("A", 0, Some(10.0)), &config());
        assert_eq!(result.score, 0);
        assert_eq!(result.reason, Some(ScoreReason::OutOfStock));
    }

    #[test]
    fn base_score_is_in_stock_weight_only() {
        let result = score(&view("A", 20, Some(10.0)), &config());
        assert_eq!(result.score, 100);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn high_stock_and_high_value_bonuses_stack() {
        let result = score(&view("A", 60, Some(75.0)), &config());
        assert_eq!(result.score, 100 + 20 + 15);
    }

    #[test]
    fn low_stock_bonus_applies_near_zero() {
        let result = score(&view("A", 3, Some(10.0)), &config());
        assert_eq!(result.score, 100 + 10);
    }

    #[test]
    fn top_n_drops_zero_scores_and_truncates() {
        let cfg = config();
        let scored = vec![
            score(&view("A", 0, Some(1.0)), &cfg),
            score(&view("B", 60, Some(75.0)), &cfg),
            score(&view("C", 10, Some(1.0)), &cfg),
        ];
        let top = top_n(scored, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].sku, "B");
    }
}
