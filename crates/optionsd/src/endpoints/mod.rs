use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use optionsd_service::metric;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

use crate::service::RequestService;

mod ema;
mod error;
mod metrics;
mod option_data;

pub use error::ResponseError;

use ema::handle_ema_request as ema;
use option_data::handle_option_data_request as option_data;

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: RequestService) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(middleware::from_fn(metrics::track_requests));
    Router::new()
        .route("/option-data", post(option_data))
        .route("/indicators/ema", get(ema))
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
