//! SoT and marketplace HTTP boundaries, each behind an async trait so
//! the sync engine, background worker, and orchestrator can be driven
//! against an in-memory fake in tests — the traits exist precisely so
//! the core pipeline never touches `reqwest` directly.

mod marketplace;
mod sot;

pub use marketplace::{
    HttpMarketplaceAdapter, InventoryUpdate, ItemUpdate, MarketplaceAdapter, MarketplaceOutcome,
};
pub use sot::{HttpSotAdapter, SotAdapter};

#[cfg(test)]
pub use marketplace::FakeMarketplaceAdapter;
#[cfg(test)]
pub use sot::FakeSotAdapter;
