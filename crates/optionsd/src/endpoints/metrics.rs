use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use optionsd_service::metric;

/// Reports the duration and status code of every routed HTTP request.
///
/// Both metrics are tagged with the matched route, requests that did not match any route are
/// tagged `unmatched`.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let start = Instant::now();
    let response = next.run(request).await;

    metric!(timer("requests.duration") = start.elapsed(), "route" => route.as_str());
    metric!(
        counter("responses.status_code") += 1,
        "status" => response.status().as_str(),
        "route" => route.as_str(),
    );
    response
}
