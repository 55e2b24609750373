use optionsd_service::config::UpstreamConfig;
use optionsd_service::fetch::YahooMarketData;
use optionsd_service::indicators::{EmaSignal, IndicatorError, fetch_ema};
use optionsd_test as test;

use crate::YahooServer;

#[tokio::test]
async fn test_ema_from_upstream() {
    test::setup();
    let server = YahooServer::new();
    let config = UpstreamConfig {
        base_url: server.url(),
        ..Default::default()
    };
    let yahoo = YahooMarketData::new(&config).unwrap();

    let report = fetch_ema(&yahoo, "aapl", 2).await.unwrap();
    assert_eq!(report.ticker, "AAPL");
    assert_eq!(report.latest_close, 192.5);
    assert_eq!(report.signal, EmaSignal::PriceAboveEma);
    assert!(report.ema > 188.0 && report.ema < 192.5);

    let err = fetch_ema(&yahoo, "AAPL", 50).await.unwrap_err();
    assert!(matches!(err, IndicatorError::InsufficientHistory { available: 3, .. }), "{err:?}");

    let err = fetch_ema(&yahoo, "NOPE", 5).await.unwrap_err();
    assert!(matches!(err, IndicatorError::InsufficientHistory { available: 0, .. }), "{err:?}");
}
