//! Errors shared by the ingestion endpoints.

use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use proxy_metrics::{NormalizeError, ParseMetricKindError};

use crate::pipeline::SubmitError;
use crate::utils::ApiErrorResponse;

/// An error that rejects a metric submission.
#[derive(Debug, thiserror::Error)]
pub enum BadMetricRequest {
    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),

    #[error("could not read request body")]
    BodyRead(#[from] BytesRejection),

    #[error("invalid JSON data")]
    InvalidJson(#[source] serde_json::Error),

    #[error(transparent)]
    UnknownKind(#[from] ParseMetricKindError),

    #[error(transparent)]
    InvalidMetric(#[from] NormalizeError),

    #[error("metric queue is closed")]
    QueueClosed,
}

impl From<SubmitError> for BadMetricRequest {
    fn from(error: SubmitError) -> Self {
        match error {
            SubmitError::Rejected(error) => Self::InvalidMetric(error),
            SubmitError::QueueClosed => Self::QueueClosed,
        }
    }
}

impl BadMetricRequest {
    fn status(&self) -> StatusCode {
        match self {
            Self::BodyRead(rejection) => rejection.status(),
            Self::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnsupportedContentType(_)
            | Self::InvalidJson(_)
            | Self::UnknownKind(_)
            | Self::InvalidMetric(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for BadMetricRequest {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            proxy_log::error!(
                error = &self as &dyn std::error::Error,
                "error handling metric submission"
            );
        }

        (status, ApiErrorResponse::from_error(&self)).into_response()
    }
}
