//! The in-memory option cache and its freshness policy.
//!
//! Entries are classified by age into [`Freshness::Fresh`], [`Freshness::Stale`] and
//! [`Freshness::Expired`]. The [`CacheStore`] itself never looks at the entry age, it only stores
//! payloads together with the instant they were fetched, and tracks which keys currently have a
//! background refresh running.

mod freshness;
mod store;

pub use freshness::{Freshness, FreshnessPolicy, InvalidFreshnessPolicy};
pub use store::{CacheEntry, CacheStore, RefreshToken};
