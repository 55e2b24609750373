//! Option market data behind a bounded request pipeline and a stale-while-revalidate cache.
//!
//! Callers go through [`pipeline::Pipeline`], which admits at most
//! [`queue_capacity`](config::PipelineConfig::queue_capacity) requests at a time and serves them
//! from the [`caching::CacheStore`] whenever possible. Only cache misses and expired entries wait
//! on the upstream [`fetch::DataFetcher`], stale entries are served right away and refreshed in
//! the background.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod fetch;
pub mod indicators;
pub mod pipeline;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test;
