//! Error classification for the sync pipeline. Component and adapter
//! code returns `anyhow::Result` with `.context(...)` throughout, the
//! same way the teacher repo does; `SyncError` exists only where a
//! caller needs to match on *which* dependency failed (metrics
//! attribution, breaker naming), not for routine propagation.

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum SyncError {
    /// SoT authentication failed even after one re-auth attempt.
    SotAuth(String),
    /// SoT returned zero inventory rows. Fatal for the run, by design:
    /// never treat "nothing came back" as "disable everything".
    SotEmptyInventory,
    /// SoT returned fewer product details than ids requested.
    SotPartialDetails { requested: usize, received: usize },
    /// Marketplace returned 429. Carries the parsed `Retry-After`, if
    /// any, for the Retrier/RateGovernor/AdaptiveBatcher chain.
    MarketplaceRateLimited { retry_after: Option<Duration> },
    /// Marketplace returned 5xx. Retriable by the marketplace policy.
    MarketplaceServerError { status: u16, body: String },
    /// Marketplace returned a non-retriable 4xx (excluding 409, which the
    /// adapter treats as success before this variant is ever produced).
    MarketplaceTerminal { status: u16, body: String },
    /// A circuit breaker was open when the call was attempted.
    BreakerOpen { name: String },
    /// A batch exceeded the marketplace's per-request payload ceiling.
    MarketplaceBatchTooLarge { len: usize, max: usize },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::SotAuth(msg) => write!(f, "SoT authentication failed: {msg}"),
            SyncError::SotEmptyInventory => {
                write!(f, "SoT returned empty inventory; aborting rather than disabling everything")
            }
            SyncError::SotPartialDetails { requested, received } => write!(
                f,
                "SoT returned {received} of {requested} requested product details; aborting"
            ),
            SyncError::MarketplaceRateLimited { retry_after } => {
                write!(f, "marketplace rate limited us, retry_after={retry_after:?}")
            }
            SyncError::MarketplaceServerError { status, body } => {
                write!(f, "marketplace server error {status}: {body}")
            }
            SyncError::MarketplaceTerminal { status, body } => {
                write!(f, "marketplace returned terminal status {status}: {body}")
            }
            SyncError::BreakerOpen { name } => write!(f, "circuit breaker '{name}' is open"),
            SyncError::MarketplaceBatchTooLarge { len, max } => {
                write!(f, "batch of {len} updates exceeds marketplace payload ceiling of {max}")
            }
        }
    }
}

impl std::error::Error for SyncError {}

/// Which upstream dependency an error is attributed to, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Sot,
    Marketplace,
}

impl SyncError {
    pub fn dependency(&self) -> Dependency {
        match self {
            SyncError::SotAuth(_) | SyncError::SotEmptyInventory | SyncError::SotPartialDetails { .. } => {
                Dependency::Sot
            }
            SyncError::MarketplaceRateLimited { .. }
            | SyncError::MarketplaceServerError { .. }
            | SyncError::MarketplaceTerminal { .. }
            | SyncError::MarketplaceBatchTooLarge { .. } => Dependency::Marketplace,
            SyncError::BreakerOpen { name } => {
                if name == "sot" {
                    Dependency::Sot
                } else {
                    Dependency::Marketplace
                }
            }
        }
    }
}
