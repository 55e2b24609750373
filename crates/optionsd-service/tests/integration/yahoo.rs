use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use optionsd_service::config::{PipelineConfig, UpstreamConfig};
use optionsd_service::fetch::{
    DataFetcher, FetchError, HistoryRange, MarketData, OptionDataFetcher, YahooMarketData,
};
use optionsd_service::pipeline::Pipeline;
use optionsd_service::types::{OptionKind, OptionPayload, RequestDescriptor};
use optionsd_test as test;

use crate::YahooServer;

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 8, 12, 0, 0).unwrap()
}

fn yahoo(server: &YahooServer) -> YahooMarketData {
    test::setup();
    let config = UpstreamConfig {
        base_url: server.url(),
        max_retries: 2,
        ..Default::default()
    };
    YahooMarketData::new(&config).unwrap()
}

#[tokio::test]
async fn test_close_history() {
    let server = YahooServer::new();
    let yahoo = yahoo(&server);

    let closes = yahoo
        .close_history("AAPL", HistoryRange::SixMonths)
        .await
        .unwrap();
    assert_eq!(closes, vec![188.0, 190.0, 192.5]);
    assert_eq!(server.hits("/v8/finance/chart/AAPL"), 1);

    let closes = yahoo.close_history("NOPE", HistoryRange::OneDay).await.unwrap();
    assert!(closes.is_empty());
}

#[tokio::test]
async fn test_retries_unavailable_upstream() {
    let server = YahooServer::new();
    let yahoo = yahoo(&server);

    let closes = yahoo.close_history("FLAKY", HistoryRange::OneDay).await.unwrap();
    assert_eq!(closes, vec![50.0]);
    assert_eq!(server.hits("/v8/finance/chart/FLAKY"), 2);
}

#[tokio::test]
async fn test_malformed_response() {
    let server = YahooServer::new();
    let yahoo = yahoo(&server);

    let err = yahoo
        .close_history("BROKEN", HistoryRange::OneDay)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Malformed(_)), "{err:?}");
    // malformed responses are not retried
    assert_eq!(server.hits("/v8/finance/chart/BROKEN"), 1);
}

#[tokio::test]
async fn test_unreachable_upstream() {
    test::setup();
    let config = UpstreamConfig {
        // nothing listens on the discard port
        base_url: "http://127.0.0.1:9/".parse().unwrap(),
        max_retries: 0,
        ..Default::default()
    };
    let yahoo = YahooMarketData::new(&config).unwrap();

    let err = yahoo.expirations("AAPL").await.unwrap_err();
    assert!(matches!(err, FetchError::Upstream(_)), "{err:?}");
}

#[tokio::test]
async fn test_expirations_and_chain() {
    let server = YahooServer::new();
    let yahoo = yahoo(&server);

    let expirations = yahoo.expirations("AAPL").await.unwrap();
    let formatted: Vec<_> = expirations.iter().map(|d| d.to_string()).collect();
    assert_eq!(formatted, ["2030-01-18", "2030-02-15"]);

    let chain = yahoo.option_chain("AAPL", expirations[1]).await.unwrap();
    assert_eq!(chain.calls.len(), 1);
    assert_eq!(chain.calls[0].strike, 200.0);
    assert!(chain.puts.is_empty());

    assert!(yahoo.expirations("NOPE").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_option_data_through_pipeline() {
    let server = YahooServer::new();
    let fetcher = OptionDataFetcher::new(yahoo(&server), 0.045).with_clock(fixed_now);
    let pipeline = Pipeline::new(&PipelineConfig::default(), Arc::new(fetcher)).unwrap();

    let call = RequestDescriptor::new("AAPL", OptionKind::Call);
    let expected = OptionPayload {
        spot: 192.5,
        // 190 and 195 are equally close, the first listed wins
        strike: 190.0,
        time_to_expiry: 9.0 / 365.0,
        risk_free_rate: 0.045,
        implied_volatility: 0.29,
        kind: OptionKind::Call,
    };
    assert_eq!(pipeline.request(call.clone()).await, Ok(expected.clone()));

    // served from the cache the second time
    assert_eq!(pipeline.request(call).await, Ok(expected));
    assert_eq!(server.hits("/v8/finance/chart/AAPL"), 1);
    assert_eq!(server.hits("/v7/finance/options/AAPL"), 2);
}

#[tokio::test]
async fn test_option_data_errors() {
    let server = YahooServer::new();
    let fetcher = OptionDataFetcher::new(yahoo(&server), 0.045).with_clock(fixed_now);

    let unknown = RequestDescriptor::new("AAPL", OptionKind::Call).with_expiration("2030-03-15");
    let err = fetcher.fetch(&unknown).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "expiration 2030-03-15 not found, available: 2030-01-18, 2030-02-15"
    );

    let no_puts = RequestDescriptor::new("AAPL", OptionKind::Put).with_expiration("2030-02-15");
    let err = fetcher.fetch(&no_puts).await.unwrap_err();
    assert!(matches!(err, FetchError::EmptyChain { .. }), "{err:?}");

    let delisted = RequestDescriptor::new("NOPE", OptionKind::Call);
    let err = fetcher.fetch(&delisted).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::NoPriceHistory {
            symbol: "NOPE".into()
        }
    );
}
