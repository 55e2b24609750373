use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use optionsd_service::fetch::FetchError;
use optionsd_service::indicators::IndicatorError;
use optionsd_service::pipeline::PipelineError;
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
}

impl ResponseError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn fetch_status(err: &FetchError) -> StatusCode {
    match err {
        FetchError::NoPriceHistory { .. }
        | FetchError::NoOptionsListed { .. }
        | FetchError::EmptyChain { .. } => StatusCode::NOT_FOUND,
        FetchError::UnknownExpiration { .. } => StatusCode::BAD_REQUEST,
        FetchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        FetchError::Upstream(_) | FetchError::Malformed(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<PipelineError> for ResponseError {
    fn from(err: PipelineError) -> Self {
        let status = match err {
            PipelineError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Fetch(ref err) => fetch_status(err),
            PipelineError::WorkerInternal | PipelineError::ShutDown => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            err: err.into(),
        }
    }
}

impl From<IndicatorError> for ResponseError {
    fn from(err: IndicatorError) -> Self {
        let status = match err {
            IndicatorError::InvalidWindow => StatusCode::BAD_REQUEST,
            IndicatorError::InsufficientHistory { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            IndicatorError::Fetch(ref err) => fetch_status(err),
        };
        Self {
            status,
            err: err.into(),
        }
    }
}

impl From<JsonRejection> for ResponseError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            err: anyhow::anyhow!(rejection.body_text()),
        }
    }
}

impl From<QueryRejection> for ResponseError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            err: anyhow::anyhow!(rejection.body_text()),
        }
    }
}

impl From<anyhow::Error> for ResponseError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        // overload is expected under load and not worth an error report
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            capture_anyhow(&self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = status;
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let detail = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse { detail, causes }
    }
}
