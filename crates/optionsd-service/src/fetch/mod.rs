//! Retrieval of option data from the upstream market data provider.
//!
//! The pipeline only knows the [`DataFetcher`] trait. [`OptionDataFetcher`] implements it on top
//! of any [`MarketData`] provider by resolving the nearest expiration and strike, and
//! [`YahooMarketData`] is the HTTP provider used in production.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::types::{OptionKind, OptionPayload, RequestDescriptor};

mod options;
mod provider;
mod yahoo;

pub use options::OptionDataFetcher;
pub use provider::{HistoryRange, MarketData, OptionChain, OptionQuote};
pub use yahoo::YahooMarketData;

/// An error that prevents option data from being produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// The upstream has no recent prices for the symbol.
    #[error("could not fetch price for {symbol}")]
    NoPriceHistory { symbol: String },
    /// The symbol has no listed options.
    #[error("no options found for {symbol}")]
    NoOptionsListed { symbol: String },
    /// The requested expiration is not listed for the symbol.
    #[error("expiration {expiration} not found, available: {}", .available.join(", "))]
    UnknownExpiration {
        expiration: String,
        available: Vec<String>,
    },
    /// The option chain has no contracts of the requested kind.
    #[error("no {kind}s found for {symbol} on {expiration}")]
    EmptyChain {
        symbol: String,
        kind: OptionKind,
        expiration: String,
    },
    /// The upstream did not answer in time.
    #[error("upstream request timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    /// The upstream could not be reached or answered with an error.
    #[error("upstream request failed: {0}")]
    Upstream(String),
    /// The upstream answered with something that could not be understood.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether the upstream has no data for the request, as opposed to failing to deliver it.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoPriceHistory { .. } | Self::NoOptionsListed { .. } | Self::EmptyChain { .. }
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

/// Produces the [`OptionPayload`] for a request, usually by calling out to an upstream service.
///
/// Implementations are expected to be slow. The pipeline bounds every call with a timeout and
/// never calls a fetcher for requests that can be served from the cache.
pub trait DataFetcher: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        descriptor: &'a RequestDescriptor,
    ) -> BoxFuture<'a, Result<OptionPayload, FetchError>>;
}
