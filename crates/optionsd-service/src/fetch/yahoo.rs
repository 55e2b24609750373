use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::UpstreamConfig;
use crate::utils::futures::{m, measure};

use super::{FetchError, HistoryRange, MarketData, OptionChain, OptionQuote};

/// Delay before the first retry, doubled for every further attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Upper bound for the delay between two attempts.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// The delay before retry number `attempt`, counting from zero.
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY)
}

/// Market data from the Yahoo Finance chart and options APIs.
#[derive(Clone, Debug)]
pub struct YahooMarketData {
    client: reqwest::Client,
    base_url: Url,
    max_retries: u32,
}

impl YahooMarketData {
    pub fn new(config: &UpstreamConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;

        Ok(Self::with_client(client, config.base_url.clone(), config.max_retries))
    }

    pub fn with_client(client: reqwest::Client, base_url: Url, max_retries: u32) -> Self {
        Self {
            client,
            base_url,
            max_retries,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Upstream(format!("invalid base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Requests `url` and parses the JSON response, retrying transient failures.
    ///
    /// Returns `None` if the upstream does not know the requested resource.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, FetchError> {
        let mut attempt = 0;
        loop {
            let result = self
                .client
                .get(url.clone())
                .header(header::ACCEPT, "application/json")
                .send()
                .await;

            let failure = match result {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) if response.status().is_success() => {
                    let body = response.bytes().await?;
                    return serde_json::from_slice(&body)
                        .map(Some)
                        .map_err(|err| FetchError::Malformed(err.to_string()));
                }
                Ok(response) => {
                    let status = response.status();
                    let error = FetchError::Upstream(format!("{url} responded with {status}"));
                    let retry =
                        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    (error, retry)
                }
                Err(err) => {
                    let retry = err.is_connect() || err.is_timeout() || err.is_request();
                    (FetchError::from(err), retry)
                }
            };

            match failure {
                (error, true) if attempt < self.max_retries => {
                    let delay = retry_delay(attempt);
                    tracing::debug!(%url, %error, ?delay, "Retrying upstream request");
                    metric!(counter("upstream.retry") += 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                (error, _) => return Err(error),
            }
        }
    }

    async fn fetch_closes(
        &self,
        symbol: &str,
        range: HistoryRange,
    ) -> Result<Vec<f64>, FetchError> {
        let mut url = self.endpoint(&["v8", "finance", "chart", symbol])?;
        url.query_pairs_mut()
            .append_pair("range", range.as_str())
            .append_pair("interval", "1d");

        let chart: Option<ChartResponse> = self.get_json(url).await?;
        let closes = chart
            .and_then(|chart| chart.chart.result)
            .and_then(|results| results.into_iter().next())
            .and_then(|result| result.indicators.quote.into_iter().next())
            .map(|quote| quote.close.into_iter().flatten().collect())
            .unwrap_or_default();
        Ok(closes)
    }

    async fn fetch_options(
        &self,
        symbol: &str,
        date: Option<NaiveDate>,
    ) -> Result<Option<OptionsResult>, FetchError> {
        let mut url = self.endpoint(&["v7", "finance", "options", symbol])?;
        if let Some(date) = date {
            let timestamp = date.and_time(NaiveTime::MIN).and_utc().timestamp();
            url.query_pairs_mut()
                .append_pair("date", &timestamp.to_string());
        }

        let options: Option<OptionsResponse> = self.get_json(url).await?;
        Ok(options
            .and_then(|options| options.option_chain.result)
            .and_then(|results| results.into_iter().next()))
    }

    async fn fetch_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, FetchError> {
        let Some(result) = self.fetch_options(symbol, None).await? else {
            return Ok(Vec::new());
        };
        result
            .expiration_dates
            .into_iter()
            .map(|timestamp| {
                DateTime::from_timestamp(timestamp, 0)
                    .map(|date| date.date_naive())
                    .ok_or_else(|| {
                        FetchError::Malformed(format!("invalid expiration timestamp {timestamp}"))
                    })
            })
            .collect()
    }

    async fn fetch_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<OptionChain, FetchError> {
        let contracts = self
            .fetch_options(symbol, Some(expiration))
            .await?
            .and_then(|result| result.options.into_iter().next())
            .unwrap_or_default();

        Ok(OptionChain {
            calls: contracts.calls.into_iter().map(Contract::into_quote).collect(),
            puts: contracts.puts.into_iter().map(Contract::into_quote).collect(),
        })
    }
}

impl MarketData for YahooMarketData {
    fn close_history<'a>(
        &'a self,
        symbol: &'a str,
        range: HistoryRange,
    ) -> BoxFuture<'a, Result<Vec<f64>, FetchError>> {
        measure("yahoo.chart", m::result, self.fetch_closes(symbol, range)).boxed()
    }

    fn expirations<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<Vec<NaiveDate>, FetchError>> {
        measure("yahoo.expirations", m::result, self.fetch_expirations(symbol)).boxed()
    }

    fn option_chain<'a>(
        &'a self,
        symbol: &'a str,
        expiration: NaiveDate,
    ) -> BoxFuture<'a, Result<OptionChain, FetchError>> {
        measure("yahoo.options", m::result, self.fetch_chain(symbol, expiration)).boxed()
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize)]
struct QuoteSeries {
    /// Days without trades have a `null` close.
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct OptionsResponse {
    #[serde(rename = "optionChain")]
    option_chain: OptionsBody,
}

#[derive(Debug, Deserialize)]
struct OptionsBody {
    #[serde(default)]
    result: Option<Vec<OptionsResult>>,
}

#[derive(Debug, Deserialize)]
struct OptionsResult {
    #[serde(default, rename = "expirationDates")]
    expiration_dates: Vec<i64>,
    #[serde(default)]
    options: Vec<Contracts>,
}

#[derive(Debug, Default, Deserialize)]
struct Contracts {
    #[serde(default)]
    calls: Vec<Contract>,
    #[serde(default)]
    puts: Vec<Contract>,
}

#[derive(Debug, Deserialize)]
struct Contract {
    strike: f64,
    #[serde(default, rename = "impliedVolatility")]
    implied_volatility: f64,
}

impl Contract {
    fn into_quote(self) -> OptionQuote {
        OptionQuote {
            strike: self.strike,
            implied_volatility: self.implied_volatility,
        }
    }
}
