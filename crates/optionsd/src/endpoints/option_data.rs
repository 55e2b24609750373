use axum::extract::rejection::JsonRejection;
use axum::extract::{self, Json};
use optionsd_service::types::{OptionPayload, RequestDescriptor};

use crate::service::RequestService;

use super::ResponseError;

pub async fn handle_option_data_request(
    extract::State(service): extract::State<RequestService>,
    body: Result<Json<RequestDescriptor>, JsonRejection>,
) -> Result<Json<OptionPayload>, ResponseError> {
    let Json(descriptor) = body?;

    sentry::configure_scope(|scope| {
        scope.set_tag("request.symbol", &descriptor.symbol);
        scope.set_tag("request.kind", descriptor.kind);
    });

    let payload = service.pipeline().request(descriptor).await?;
    Ok(Json(payload))
}
