//! Helpers for testing the pipeline and the web server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`YahooServer`], make sure that the server is held until all requests to it have
//!    been made. The server stops serving when dropped.
//!
//!  - A [`ScriptedFetcher`] counts every call, including calls that are still waiting on its gate.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{self, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Semaphore, watch};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use optionsd_service::fetch::{DataFetcher, FetchError};
use optionsd_service::types::{OptionKind, OptionPayload, RequestDescriptor};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the optionsd crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("optionsd=trace,optionsd_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A call option payload with the given spot price.
pub fn payload(spot: f64) -> OptionPayload {
    OptionPayload {
        spot,
        strike: 100.0,
        time_to_expiry: 0.25,
        risk_free_rate: 0.045,
        implied_volatility: 0.3,
        kind: OptionKind::Call,
    }
}

/// What a single call to the [`ScriptedFetcher`] does.
#[derive(Debug)]
pub enum Outcome {
    /// Returns the payload.
    Payload(OptionPayload),
    /// Fails with the error.
    Fail(FetchError),
    /// Panics while fetching.
    Panic,
    /// Never completes.
    Hang,
}

/// A [`DataFetcher`] that plays back scripted outcomes.
///
/// Calls without a scripted outcome return [`payload`] with a spot price of `100 + n` for the
/// `n`th call. A gated fetcher additionally waits for [`open`](Self::open) before every call.
#[derive(Debug)]
pub struct ScriptedFetcher {
    calls: watch::Sender<usize>,
    script: Mutex<VecDeque<Outcome>>,
    gate: Option<Semaphore>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            calls: watch::Sender::new(0),
            script: Mutex::new(VecDeque::new()),
            gate: None,
        }
    }

    /// Creates a fetcher whose calls block until released with [`open`](Self::open).
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// Appends outcomes for the next calls.
    pub fn script(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.script.lock().unwrap().extend(outcomes);
        self
    }

    /// Lets `calls` blocked or future calls through the gate.
    pub fn open(&self, calls: usize) {
        if let Some(ref gate) = self.gate {
            gate.add_permits(calls);
        }
    }

    /// The number of calls so far.
    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }

    /// Waits until at least `calls` calls have been made.
    pub async fn wait_for_calls(&self, calls: usize) {
        let mut receiver = self.calls.subscribe();
        receiver.wait_for(|made| *made >= calls).await.unwrap();
    }
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFetcher for ScriptedFetcher {
    fn fetch<'a>(
        &'a self,
        _descriptor: &'a RequestDescriptor,
    ) -> BoxFuture<'a, Result<OptionPayload, FetchError>> {
        let mut call = 0;
        self.calls.send_modify(|calls| {
            *calls += 1;
            call = *calls;
        });
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Outcome::Payload(payload(100.0 + call as f64)));

        async move {
            if let Some(ref gate) = self.gate {
                gate.acquire().await.unwrap().forget();
            }
            match outcome {
                Outcome::Payload(payload) => Ok(payload),
                Outcome::Fail(error) => Err(error),
                Outcome::Panic => panic!("scripted fetcher panic"),
                Outcome::Hang => std::future::pending().await,
            }
        }
        .boxed()
    }
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Unix timestamp of 2030-01-18, the nearest listed expiration.
pub const NEAR_EXPIRATION: i64 = 1894924800;
/// Unix timestamp of 2030-02-15.
pub const FAR_EXPIRATION: i64 = 1897344000;

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

/// A mock of the Yahoo Finance chart and options APIs.
///
/// Serves the following symbols:
///  - `AAPL`: closes and two expirations with calls and puts.
///  - `FLAKY`: fails with `503` on every other chart request.
///  - `BROKEN`: answers chart requests with invalid JSON.
///
/// All other symbols are answered with `404`, like the real API does for unknown symbols. Every
/// request is counted by its path.
pub struct YahooServer {
    server: Server,
    hits: Hits,
}

impl YahooServer {
    pub fn new() -> Self {
        let hits = Hits::default();

        let router = Router::new()
            .route("/v8/finance/chart/:symbol", get(chart))
            .route("/v7/finance/options/:symbol", get(options))
            .layer(middleware::from_fn_with_state(hits.clone(), count_hits))
            .with_state(hits.clone());

        Self {
            server: Server::with_router(router),
            hits,
        }
    }

    /// The base URL of the mocked API.
    pub fn url(&self) -> Url {
        self.server.url("/")
    }

    /// The number of requests to `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or_default()
    }

    /// Returns and resets the number of requests per path.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }
}

impl Default for YahooServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn count_hits(State(hits): State<Hits>, request: Request, next: Next) -> Response {
    {
        let mut hits = hits.lock().unwrap();
        *hits.entry(request.uri().path().to_owned()).or_default() += 1;
    }
    next.run(request).await
}

fn not_found(envelope: &str) -> Response {
    let body = json!({
        envelope: {
            "result": null,
            "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
        }
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

async fn chart(
    State(hits): State<Hits>,
    extract::Path(symbol): extract::Path<String>,
) -> Response {
    let closes = match symbol.as_str() {
        "AAPL" => json!([188.0, null, 190.0, 192.5]),
        "FLAKY" => {
            let path = format!("/v8/finance/chart/{symbol}");
            let count = hits.lock().unwrap().get(&path).copied().unwrap_or_default();
            if count % 2 == 1 {
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
            json!([50.0])
        }
        "BROKEN" => return "<html>not json</html>".into_response(),
        _ => return not_found("chart"),
    };

    Json(json!({
        "chart": {
            "result": [{
                "meta": {"symbol": symbol, "currency": "USD"},
                "timestamp": [1893456000, 1893542400, 1893628800, 1893715200],
                "indicators": {"quote": [{"close": closes}]}
            }],
            "error": null
        }
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct OptionsQuery {
    date: Option<i64>,
}

async fn options(
    extract::Path(symbol): extract::Path<String>,
    extract::Query(query): extract::Query<OptionsQuery>,
) -> Response {
    if symbol != "AAPL" {
        return not_found("optionChain");
    }

    let date = query.date.unwrap_or(NEAR_EXPIRATION);
    let contracts = match date {
        NEAR_EXPIRATION => json!({
            "expirationDate": NEAR_EXPIRATION,
            "calls": [
                {"strike": 185.0, "impliedVolatility": 0.31},
                {"strike": 190.0, "impliedVolatility": 0.29},
                {"strike": 195.0, "impliedVolatility": 0.27}
            ],
            "puts": [
                {"strike": 190.0, "impliedVolatility": 0.33}
            ]
        }),
        FAR_EXPIRATION => json!({
            "expirationDate": FAR_EXPIRATION,
            "calls": [{"strike": 200.0, "impliedVolatility": 0.25}],
            "puts": []
        }),
        _ => json!({"expirationDate": date, "calls": [], "puts": []}),
    };

    Json(json!({
        "optionChain": {
            "result": [{
                "underlyingSymbol": symbol,
                "expirationDates": [NEAR_EXPIRATION, FAR_EXPIRATION],
                "strikes": [185.0, 190.0, 195.0, 200.0],
                "options": [contracts]
            }],
            "error": null
        }
    }))
    .into_response()
}
