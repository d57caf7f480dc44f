//! The ERP "source of truth" boundary: authentication, inventory, and
//! product detail lookups. Built the way `PolymarketScraper` is — a
//! `reqwest::Client` built once with a timeout and user agent,
//! credentials carried on the struct — but with bearer-token re-auth
//! on a single 401 instead of a fixed request-rate limiter, since the
//! SoT here is called at sync cadence, not market-data cadence.

use crate::error::SyncError;
use crate::models::{InventoryRecord, ProductDetail};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

const DETAILS_CHUNK_SIZE: usize = 1000;

#[async_trait]
pub trait SotAdapter: Send + Sync {
    async fn inventory(&self, store_id: i64) -> Result<Vec<InventoryRecord>>;
    async fn products(&self, ids: &[i64]) -> Result<Vec<ProductDetail>>;
}

pub struct HttpSotAdapter {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    token: parking_lot::Mutex<Option<String>>,
}

impl HttpSotAdapter {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("catalog-sync-engine/0.1")
            .build()
            .expect("failed to build SoT HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            token: parking_lot::Mutex::new(None),
        }
    }

    async fn authenticate(&self) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct AuthResponse {
            token: String,
        }

        let response = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&serde_json::json!({ "login": self.username, "password": self.password }))
            .send()
            .await
            .context("SoT authentication request failed")?;

        if !response.status().is_success() {
            bail!(SyncError::SotAuth(format!("status {}", response.status())));
        }

        let parsed: AuthResponse = response.json().await.context("parsing SoT auth response")?;
        *self.token.lock() = Some(parsed.token.clone());
        Ok(parsed.token)
    }

    async fn bearer_token(&self) -> Result<String> {
        if let Some(token) = self.token.lock().clone() {
            return Ok(token);
        }
        self.authenticate().await
    }

    /// Re-authenticates once and retries on a 401 before giving up.
    async fn execute_authed<T, B>(&self, build_request: B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.bearer_token().await?;
        let response = build_request(&token).send().await.context("SoT request failed")?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let token = self.authenticate().await?;
            build_request(&token)
                .send()
                .await
                .context("SoT retry after re-auth failed")?
        } else {
            response
        };

        if !response.status().is_success() {
            bail!(SyncError::SotAuth(format!("status {}", response.status())));
        }

        response.json::<T>().await.context("parsing SoT response body")
    }
}

#[async_trait]
impl SotAdapter for HttpSotAdapter {
    async fn inventory(&self, store_id: i64) -> Result<Vec<InventoryRecord>> {
        let url = format!("{}/inventory/{store_id}", self.base_url);
        let records: Vec<InventoryRecord> = self
            .execute_authed(|token| self.client.get(&url).bearer_auth(token))
            .await
            .context("fetching SoT inventory")?;

        if records.is_empty() {
            bail!(SyncError::SotEmptyInventory);
        }
        Ok(records)
    }

    async fn products(&self, ids: &[i64]) -> Result<Vec<ProductDetail>> {
        let mut all = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(DETAILS_CHUNK_SIZE) {
            let url = format!("{}/products", self.base_url);
            let ids_param = chunk.iter().map(i64::to_string).collect::<Vec<_>>().join(",");

            let details: Vec<ProductDetail> = self
                .execute_authed(|token| {
                    self.client.get(&url).bearer_auth(token).query(&[("ids", &ids_param)])
                })
                .await
                .context("fetching SoT product details")?;

            if details.len() < chunk.len() {
                bail!(SyncError::SotPartialDetails { requested: chunk.len(), received: details.len() });
            }
            all.extend(details);
        }
        Ok(all)
    }
}

/// In-memory fake driving the sync engine in tests, without touching
/// the network.
#[cfg(test)]
pub struct FakeSotAdapter {
    pub inventory: parking_lot::Mutex<Vec<InventoryRecord>>,
    pub details: parking_lot::Mutex<Vec<ProductDetail>>,
}

#[cfg(test)]
impl FakeSotAdapter {
    pub fn new(inventory: Vec<InventoryRecord>, details: Vec<ProductDetail>) -> Self {
        Self { inventory: parking_lot::Mutex::new(inventory), details: parking_lot::Mutex::new(details) }
    }
}

#[cfg(test)]
#[async_trait]
impl SotAdapter for FakeSotAdapter {
    async fn inventory(&self, _store_id: i64) -> Result<Vec<InventoryRecord>> {
        let records = self.inventory.lock().clone();
        if records.is_empty() {
            bail!(SyncError::SotEmptyInventory);
        }
        Ok(records)
    }

    async fn products(&self, ids: &[i64]) -> Result<Vec<ProductDetail>> {
        let all = self.details.lock().clone();
        let matched: Vec<ProductDetail> =
            all.into_iter().filter(|d| ids.contains(&d.id)).collect();

        if matched.len() < ids.len() {
            bail!(SyncError::SotPartialDetails { requested: ids.len(), received: matched.len() });
        }
        Ok(matched)
    }
}
