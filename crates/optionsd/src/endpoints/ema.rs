use axum::extract::rejection::QueryRejection;
use axum::extract::{self, Json};
use optionsd_service::indicators::{EmaReport, fetch_ema};
use serde::Deserialize;

use crate::service::RequestService;

use super::ResponseError;

fn default_window() -> usize {
    20
}

/// Query parameters of the EMA request.
#[derive(Debug, Deserialize)]
pub struct EmaQueryParams {
    pub symbol: String,
    #[serde(default = "default_window")]
    pub window: usize,
}

pub async fn handle_ema_request(
    extract::State(service): extract::State<RequestService>,
    params: Result<extract::Query<EmaQueryParams>, QueryRejection>,
) -> Result<Json<EmaReport>, ResponseError> {
    let extract::Query(params) = params?;
    sentry::configure_scope(|scope| {
        scope.set_tag("request.symbol", &params.symbol);
        scope.set_tag("request.window", params.window);
    });

    let report = fetch_ema(service.market(), &params.symbol, params.window).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use optionsd_test::ScriptedFetcher;
    use reqwest::StatusCode;
    use serde_json::Value;

    use crate::test;

    #[tokio::test]
    async fn test_ema() {
        let app = test::app(ScriptedFetcher::new());

        let response = app.get("/indicators/ema?symbol=aapl&window=3").await;
        assert_eq!(response.status(), StatusCode::OK);

        let report: Value = response.json().await.unwrap();
        assert_eq!(report["ticker"], "AAPL");
        assert_eq!(report["window"], 3);
        assert_eq!(report["latest_close"], 192.5);
        assert_eq!(report["signal"], "price_above_ema");
        assert_eq!(app.upstream.hits("/v8/finance/chart/AAPL"), 1);

        // indicators do not go through the option pipeline
        assert_eq!(app.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_ema_errors() {
        let app = test::app(ScriptedFetcher::new());

        let response = app.get("/indicators/ema?symbol=AAPL&window=0").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: Value = response.json().await.unwrap();
        assert_eq!(error["detail"], "window must be a positive integer");

        // the mocked upstream only knows three closes
        let response = app.get("/indicators/ema?symbol=AAPL").await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app.get("/indicators/ema?window=5").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.get("/indicators/ema?symbol=BROKEN").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
