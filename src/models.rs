//! Core data model shared by every component: what comes from the SoT,
//! what gets derived from it, and what gets persisted about the
//! marketplace's last-known state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The SoT extension field that carries the marketplace SKU. Stable
/// contract per spec §6 — never inline the literal elsewhere.
pub const SKU_FIELD: &str = "usr_column_514";

/// One merchant location, configured up front and immutable for the
/// duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub id: i64,
    pub name: String,
    /// Opaque venue identifier on the marketplace side.
    pub venue_id: String,
    pub username: String,
    pub password: String,
    /// Overrides the default marketplace base URL, if set.
    pub base_url: Option<String>,
    pub enabled: bool,
}

/// A venue is identified by where we call it, who as, and under what
/// account — the same triple the RateGovernor and AdaptiveBatcher key
/// their persisted state on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueKey {
    pub base_url: String,
    pub venue_id: String,
    pub user: String,
}

impl VenueKey {
    pub fn for_store(store: &Store, default_base_url: &str) -> Self {
        Self {
            base_url: store
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url.to_string()),
            venue_id: store.venue_id.clone(),
            user: store.username.clone(),
        }
    }
}

impl std::fmt::Display for VenueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.base_url, self.venue_id, self.user)
    }
}

/// Raw inventory row from the SoT. Ephemeral — never persisted as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryRecord {
    pub id: i64,
    pub rest: i64,
    pub store_id: i64,
}

/// One (field, value) extension pair on a SoT product detail record.
#[derive(Debug, Clone, Deserialize)]
pub struct AddField {
    pub field: String,
    pub value: String,
}

/// Raw product detail row from the SoT. Ephemeral — never persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductDetail {
    pub id: i64,
    pub title: String,
    /// Modeled as `Option<f64>` rather than a dynamic "maybe missing,
    /// maybe invalid" value — see design note on price ambiguity.
    pub price: Option<f64>,
    #[serde(default)]
    pub add_fields: Vec<AddField>,
}

impl ProductDetail {
    /// The marketplace SKU, if this detail carries one under
    /// [`SKU_FIELD`] and it is non-empty.
    pub fn sku(&self) -> Option<&str> {
        self.add_fields
            .iter()
            .find(|f| f.field == SKU_FIELD)
            .map(|f| f.value.as_str())
            .filter(|v| !v.is_empty())
    }

    /// True only for a finite, non-negative price. Absent or NaN/inf
    /// counts as invalid, per the force-zero rule in spec §4.7 step 6.
    pub fn has_valid_price(&self) -> bool {
        matches!(self.price, Some(p) if p.is_finite() && p >= 0.0)
    }
}

/// Derived, per-run aggregate of everything the SoT currently says about
/// one marketplace SKU. Multiple SoT product ids can map to the same
/// SKU, so quantity sums and price is last-wins.
#[derive(Debug, Clone, PartialEq)]
pub struct SkuView {
    pub sku: String,
    pub quantity: i64,
    pub price: Option<f64>,
    pub enabled: bool,
}

/// Build the per-SKU aggregate view from raw inventory + detail rows.
/// Aggregation order follows inventory record order; price is last-wins
/// over details in their given order.
pub fn build_sku_view(
    inventory: &[InventoryRecord],
    details: &[ProductDetail],
) -> HashMap<String, SkuView> {
    let mut sku_by_product: HashMap<i64, String> = HashMap::new();
    let mut price_by_sku: HashMap<String, Option<f64>> = HashMap::new();

    for detail in details {
        if let Some(sku) = detail.sku() {
            sku_by_product.insert(detail.id, sku.to_string());
            price_by_sku.insert(sku.to_string(), detail.price);
        }
    }

    let mut views: HashMap<String, SkuView> = HashMap::new();
    for record in inventory {
        let Some(sku) = sku_by_product.get(&record.id) else {
            continue;
        };
        let entry = views.entry(sku.clone()).or_insert_with(|| SkuView {
            sku: sku.clone(),
            quantity: 0,
            price: price_by_sku.get(sku).copied().flatten(),
            enabled: false,
        });
        entry.quantity += record.rest.max(0);
    }

    for view in views.values_mut() {
        view.enabled = view.quantity > 0;
    }

    views
}

/// Persisted, per-SKU, per-store record of what the marketplace last
/// confirmed. Never aggregated — one entry per distinct SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub quantity: i64,
    pub enabled: bool,
    pub price: Option<f64>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub synced_to_marketplace: bool,
}

/// The full persisted state for one store: SKU -> last-known entry.
pub type StateMap = HashMap<String, StateEntry>;

/// Crash-recovery bookkeeping for a long initial push.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub completed_batches: u32,
    pub total_batches: u32,
    pub phase: String,
}

/// Why a [`PriorityScore`] came out to zero. Only meaningful when
/// `score == 0` — a syncable SKU carries no reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreReason {
    InvalidPrice,
    OutOfStock,
}

/// Output of `PriorityScorer::score`: a non-negative integer built from
/// in-stock/high-stock/low-stock/high-value bonuses, or zero with a
/// reason when the SKU isn't syncable at all.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityScore {
    pub sku: String,
    pub score: u32,
    pub reason: Option<ScoreReason>,
}
