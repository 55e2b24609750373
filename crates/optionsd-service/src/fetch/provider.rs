use chrono::NaiveDate;
use futures::future::BoxFuture;

use crate::types::OptionKind;

use super::FetchError;

/// The span of daily price history to request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryRange {
    OneDay,
    SixMonths,
}

impl HistoryRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::SixMonths => "6mo",
        }
    }
}

/// A single listed contract.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OptionQuote {
    pub strike: f64,
    pub implied_volatility: f64,
}

/// All contracts of one expiration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptionChain {
    pub calls: Vec<OptionQuote>,
    pub puts: Vec<OptionQuote>,
}

impl OptionChain {
    /// The contracts of the given kind.
    pub fn side(&self, kind: OptionKind) -> &[OptionQuote] {
        match kind {
            OptionKind::Call => &self.calls,
            OptionKind::Put => &self.puts,
        }
    }
}

/// Raw access to an upstream market data source.
///
/// Missing data is reported as empty results rather than errors, errors are reserved for failing
/// to talk to the upstream.
pub trait MarketData: Send + Sync + 'static {
    /// Daily closing prices, oldest first.
    fn close_history<'a>(
        &'a self,
        symbol: &'a str,
        range: HistoryRange,
    ) -> BoxFuture<'a, Result<Vec<f64>, FetchError>>;

    /// Listed expiration dates, nearest first.
    fn expirations<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<Vec<NaiveDate>, FetchError>>;

    /// The chain of a listed expiration.
    fn option_chain<'a>(
        &'a self,
        symbol: &'a str,
        expiration: NaiveDate,
    ) -> BoxFuture<'a, Result<OptionChain, FetchError>>;
}
