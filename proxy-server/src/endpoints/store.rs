//! Submission of single metrics.
//!
//! The kind is taken from the path. `/{kind}/{name}` additionally overrides the metric name of the
//! body.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use proxy_metrics::{MetricKind, MetricPayload};

use crate::endpoints::common::BadMetricRequest;
use crate::extractors::{Authenticated, JsonBody};
use crate::service::ServiceState;

fn parse_kind(kind: &str) -> Result<MetricKind, BadMetricRequest> {
    kind.parse().map_err(|error| {
        proxy_log::warn!("rejected metric with unknown kind {kind:?}");
        BadMetricRequest::UnknownKind(error)
    })
}

async fn submit(
    state: &ServiceState,
    kind: MetricKind,
    payload: MetricPayload,
) -> Result<StatusCode, BadMetricRequest> {
    if let Err(error) = state.pipeline().submit(payload.into_request(kind)).await {
        proxy_log::debug!("rejected {kind} metric: {error}");
        return Err(error.into());
    }

    Ok(StatusCode::OK)
}

pub async fn handle(
    State(state): State<ServiceState>,
    _: Authenticated,
    Path(kind): Path<String>,
    JsonBody(payload): JsonBody<MetricPayload>,
) -> Result<StatusCode, BadMetricRequest> {
    let kind = parse_kind(&kind)?;
    submit(&state, kind, payload).await
}

pub async fn handle_named(
    State(state): State<ServiceState>,
    _: Authenticated,
    Path((kind, name)): Path<(String, String)>,
    JsonBody(mut payload): JsonBody<MetricPayload>,
) -> Result<StatusCode, BadMetricRequest> {
    let kind = parse_kind(&kind)?;
    payload.metric = name;
    submit(&state, kind, payload).await
}
