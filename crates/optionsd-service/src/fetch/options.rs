use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::types::{OptionPayload, RequestDescriptor};

use super::{DataFetcher, FetchError, HistoryRange, MarketData, OptionQuote};

/// The smallest time to expiry reported, in years.
///
/// Contracts expiring today or in the past are reported with this instead of zero.
const MIN_TIME_TO_EXPIRY: f64 = 0.001;

const DAYS_PER_YEAR: f64 = 365.0;

/// Resolves a [`RequestDescriptor`] to the inputs of a single contract.
///
/// The nearest listed expiration is used if the request names none. The contract with the strike
/// nearest to the requested strike is selected, or nearest to the spot price if the request names
/// no strike.
pub struct OptionDataFetcher<M> {
    provider: M,
    risk_free_rate: f64,
    clock: fn() -> DateTime<Utc>,
}

impl<M: MarketData> OptionDataFetcher<M> {
    pub fn new(provider: M, risk_free_rate: f64) -> Self {
        Self {
            provider,
            risk_free_rate,
            clock: Utc::now,
        }
    }

    /// Uses `clock` instead of the system time to compute the time to expiry.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn provider(&self) -> &M {
        &self.provider
    }

    async fn resolve(&self, descriptor: &RequestDescriptor) -> Result<OptionPayload, FetchError> {
        let symbol = descriptor.symbol.as_str();

        let closes = self
            .provider
            .close_history(symbol, HistoryRange::OneDay)
            .await?;
        let spot = closes
            .last()
            .copied()
            .ok_or_else(|| FetchError::NoPriceHistory {
                symbol: symbol.to_owned(),
            })?;

        let expirations = self.provider.expirations(symbol).await?;
        let expiration = select_expiration(symbol, &expirations, descriptor.expiration.as_deref())?;
        let expiration_str = expiration.format("%Y-%m-%d").to_string();

        let chain = self.provider.option_chain(symbol, expiration).await?;
        let target = descriptor.strike.map_or(spot, |strike| strike.0);
        let quote = nearest_quote(chain.side(descriptor.kind), target).ok_or_else(|| {
            FetchError::EmptyChain {
                symbol: symbol.to_owned(),
                kind: descriptor.kind,
                expiration: expiration_str.clone(),
            }
        })?;

        tracing::debug!(
            %descriptor,
            expiration = %expiration_str,
            strike = quote.strike,
            "Resolved option contract"
        );

        Ok(OptionPayload {
            spot,
            strike: quote.strike,
            time_to_expiry: years_until(expiration, (self.clock)()),
            risk_free_rate: self.risk_free_rate,
            implied_volatility: quote.implied_volatility,
            kind: descriptor.kind,
        })
    }
}

impl<M: MarketData> DataFetcher for OptionDataFetcher<M> {
    fn fetch<'a>(
        &'a self,
        descriptor: &'a RequestDescriptor,
    ) -> BoxFuture<'a, Result<OptionPayload, FetchError>> {
        self.resolve(descriptor).boxed()
    }
}

fn select_expiration(
    symbol: &str,
    listed: &[NaiveDate],
    requested: Option<&str>,
) -> Result<NaiveDate, FetchError> {
    if listed.is_empty() {
        return Err(FetchError::NoOptionsListed {
            symbol: symbol.to_owned(),
        });
    }

    let Some(requested) = requested else {
        return Ok(listed[0]);
    };

    let available: Vec<String> = listed
        .iter()
        .map(|date| date.format("%Y-%m-%d").to_string())
        .collect();
    match available.iter().position(|date| date == requested) {
        Some(index) => Ok(listed[index]),
        None => Err(FetchError::UnknownExpiration {
            expiration: requested.to_owned(),
            available,
        }),
    }
}

/// The quote with the strike closest to `target`, the first one listed on ties.
fn nearest_quote(quotes: &[OptionQuote], target: f64) -> Option<&OptionQuote> {
    quotes.iter().fold(None, |best: Option<&OptionQuote>, quote| match best {
        Some(best) if (best.strike - target).abs() <= (quote.strike - target).abs() => Some(best),
        _ => Some(quote),
    })
}

/// Whole days until midnight UTC of `expiration`, in years.
fn years_until(expiration: NaiveDate, now: DateTime<Utc>) -> f64 {
    let expiry = expiration.and_time(NaiveTime::MIN).and_utc();
    let years = (expiry - now).num_days() as f64 / DAYS_PER_YEAR;
    if years <= 0.0 { MIN_TIME_TO_EXPIRY } else { years }
}
