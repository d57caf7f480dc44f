//! The downstream marketplace boundary: two PATCH endpoints for item
//! metadata and inventory levels, plus a best-effort introspection GET.
//! Built the way `HashdiveScraper` builds its client; auth is HTTP
//! basic via `RequestBuilder::basic_auth` rather than a bearer token,
//! since the marketplace here never issues one.

use crate::error::SyncError;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

const MAX_BATCH_ITEMS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct ItemUpdate {
    pub sku: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryUpdate {
    pub sku: String,
    pub inventory: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketplaceOutcome {
    Success,
    /// 409 on a batch — the marketplace's own idempotency signal,
    /// treated as success at this boundary per the adapter contract.
    Duplicate,
}

#[async_trait]
pub trait MarketplaceAdapter: Send + Sync {
    async fn push_items(&self, venue_id: &str, updates: &[ItemUpdate]) -> Result<MarketplaceOutcome>;
    async fn push_inventory(
        &self,
        venue_id: &str,
        updates: &[InventoryUpdate],
    ) -> Result<MarketplaceOutcome>;
    /// Best-effort: 404/405 (unsupported) returns an empty list; other
    /// non-2xx is logged and treated the same way.
    async fn list_items(&self, venue_id: &str) -> Result<Vec<String>>;
}

pub struct HttpMarketplaceAdapter {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpMarketplaceAdapter {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("catalog-sync-engine/0.1")
            .build()
            .expect("failed to build marketplace HTTP client");

        Self { client, base_url: base_url.into(), username: username.into(), password: password.into() }
    }

    async fn patch(&self, path: &str, body: &impl Serialize) -> Result<MarketplaceOutcome> {
        let response = self
            .client
            .patch(format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await
            .context("marketplace request failed")?;

        let status = response.status();
        match status {
            StatusCode::CONFLICT => Ok(MarketplaceOutcome::Duplicate),
            StatusCode::TOO_MANY_REQUESTS => {
                bail!(SyncError::MarketplaceRateLimited { retry_after: parse_retry_after(&response) });
            }
            s if s.is_success() => Ok(MarketplaceOutcome::Success),
            s if s.is_server_error() => {
                let body = response.text().await.unwrap_or_default();
                bail!(SyncError::MarketplaceServerError { status: s.as_u16(), body });
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                bail!(SyncError::MarketplaceTerminal { status: s.as_u16(), body });
            }
        }
    }
}

#[async_trait]
impl MarketplaceAdapter for HttpMarketplaceAdapter {
    async fn push_items(&self, venue_id: &str, updates: &[ItemUpdate]) -> Result<MarketplaceOutcome> {
        if updates.len() > MAX_BATCH_ITEMS {
            bail!(SyncError::MarketplaceBatchTooLarge { len: updates.len(), max: MAX_BATCH_ITEMS });
        }
        let path = format!("/venues/{venue_id}/items");
        self.patch(&path, &serde_json::json!({ "data": updates })).await
    }

    async fn push_inventory(
        &self,
        venue_id: &str,
        updates: &[InventoryUpdate],
    ) -> Result<MarketplaceOutcome> {
        if updates.len() > MAX_BATCH_ITEMS {
            bail!(SyncError::MarketplaceBatchTooLarge { len: updates.len(), max: MAX_BATCH_ITEMS });
        }
        let path = format!("/venues/{venue_id}/items/inventory");
        self.patch(&path, &serde_json::json!({ "data": updates })).await
    }

    async fn list_items(&self, venue_id: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/venues/{venue_id}/items", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .context("marketplace introspection request failed")?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => Ok(Vec::new()),
            s if s.is_success() => {
                let payload: serde_json::Value =
                    response.json().await.context("parsing marketplace items payload")?;
                Ok(extract_skus(&payload))
            }
            _ => Ok(Vec::new()),
        }
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    let raw = response.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let now = chrono::Utc::now();
    let delta = at.with_timezone(&chrono::Utc) - now;
    delta.to_std().ok()
}

/// The GET endpoint may nest the array under `data`, `items`, or return
/// it bare; best-effort across all three shapes.
fn extract_skus(payload: &serde_json::Value) -> Vec<String> {
    let array = payload
        .get("data")
        .or_else(|| payload.get("items"))
        .or(Some(payload))
        .and_then(|v| v.as_array());

    array
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("sku").and_then(|s| s.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// In-memory fake for tests, recording every push it receives.
#[cfg(test)]
pub struct FakeMarketplaceAdapter {
    pub item_pushes: parking_lot::Mutex<Vec<Vec<ItemUpdate>>>,
    pub inventory_pushes: parking_lot::Mutex<Vec<Vec<InventoryUpdate>>>,
    pub existing_skus: Vec<String>,
}

#[cfg(test)]
impl FakeMarketplaceAdapter {
    pub fn new(existing_skus: Vec<String>) -> Self {
        Self {
            item_pushes: parking_lot::Mutex::new(Vec::new()),
            inventory_pushes: parking_lot::Mutex::new(Vec::new()),
            existing_skus,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl MarketplaceAdapter for FakeMarketplaceAdapter {
    async fn push_items(&self, _venue_id: &str, updates: &[ItemUpdate]) -> Result<MarketplaceOutcome> {
        self.item_pushes.lock().push(updates.to_vec());
        Ok(MarketplaceOutcome::Success)
    }

    async fn push_inventory(
        &self,
        _venue_id: &str,
        updates: &[InventoryUpdate],
    ) -> Result<MarketplaceOutcome> {
        self.inventory_pushes.lock().push(updates.to_vec());
        Ok(MarketplaceOutcome::Success)
    }

    async fn list_items(&self, _venue_id: &str) -> Result<Vec<String>> {
        Ok(self.existing_skus.clone())
    }
}

/// Lets a test hold its own handle to a [`FakeMarketplaceAdapter`] for
/// assertions while a `Box<dyn MarketplaceAdapter>` built from a clone
/// of the same `Arc` is handed to the component under test.
#[cfg(test)]
#[async_trait]
impl MarketplaceAdapter for std::sync::Arc<FakeMarketplaceAdapter> {
    async fn push_items(&self, venue_id: &str, updates: &[ItemUpdate]) -> Result<MarketplaceOutcome> {
        (**self).push_items(venue_id, updates).await
    }

    async fn push_inventory(&self, venue_id: &str, updates: &[InventoryUpdate]) -> Result<MarketplaceOutcome> {
        (**self).push_inventory(venue_id, updates).await
    }

    async fn list_items(&self, venue_id: &str) -> Result<Vec<String>> {
        (**self).list_items(venue_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_skus_handles_data_wrapped_payload() {
        let payload = serde_json::json!({ "data": [{"sku": "A"}, {"sku": "B"}] });
        assert_eq!(extract_skus(&payload), vec!["A", "B"]);
    }

    #[test]
    fn extract_skus_handles_bare_array_payload() {
        let payload = serde_json::json!([{"sku": "A"}]);
        assert_eq!(extract_skus(&payload), vec!["A"]);
    }

    #[test]
    fn extract_skus_handles_unrecognized_shape() {
        let payload = serde_json::json!({ "unexpected": true });
        assert!(extract_skus(&payload).is_empty());
    }
}
