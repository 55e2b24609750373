//! Technical indicators computed from daily price history.

use serde::Serialize;

use crate::fetch::{FetchError, HistoryRange, MarketData};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndicatorError {
    #[error("window must be a positive integer")]
    InvalidWindow,
    #[error("insufficient data for {symbol}: need {window} closes, got {available}")]
    InsufficientHistory {
        symbol: String,
        window: usize,
        available: usize,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Where the latest close is relative to the moving average.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaSignal {
    PriceAboveEma,
    PriceBelowEma,
    PriceAtEma,
}

impl EmaSignal {
    fn classify(latest_close: f64, ema: f64) -> Self {
        if latest_close > ema {
            Self::PriceAboveEma
        } else if latest_close < ema {
            Self::PriceBelowEma
        } else {
            Self::PriceAtEma
        }
    }
}

/// The exponential moving average of a symbol's daily closes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmaReport {
    pub ticker: String,
    pub window: usize,
    pub ema: f64,
    pub latest_close: f64,
    pub signal: EmaSignal,
}

/// Exponential moving average over `closes`, oldest first.
///
/// The average is seeded with the first close and smoothed with `2 / (window + 1)`, without bias
/// correction for the first values. Returns `None` for an empty series or a zero window.
pub fn ema(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 {
        return None;
    }
    let alpha = 2.0 / (window as f64 + 1.0);
    let (first, rest) = closes.split_first()?;
    Some(
        rest.iter()
            .fold(*first, |average, close| alpha * close + (1.0 - alpha) * average),
    )
}

/// Computes the [`EmaReport`] over the last six months of daily closes.
pub async fn fetch_ema<M>(
    provider: &M,
    symbol: &str,
    window: usize,
) -> Result<EmaReport, IndicatorError>
where
    M: MarketData + ?Sized,
{
    if window == 0 {
        return Err(IndicatorError::InvalidWindow);
    }

    let ticker = symbol.to_uppercase();
    let closes = provider
        .close_history(&ticker, HistoryRange::SixMonths)
        .await?;

    let insufficient = || IndicatorError::InsufficientHistory {
        symbol: ticker.clone(),
        window,
        available: closes.len(),
    };
    if closes.len() < window {
        return Err(insufficient());
    }
    let (Some(ema), Some(&latest_close)) = (ema(&closes, window), closes.last()) else {
        return Err(insufficient());
    };

    Ok(EmaReport {
        ticker: ticker.clone(),
        window,
        ema,
        latest_close,
        signal: EmaSignal::classify(latest_close, ema),
    })
}
