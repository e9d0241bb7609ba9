//! Submission of several metrics at once.
//!
//! Every entry carries its own `metric_type`. Invalid entries are dropped and reported, valid
//! entries are forwarded regardless.

use axum::Json;
use axum::extract::State;

use crate::endpoints::common::BadMetricRequest;
use crate::extractors::{Authenticated, JsonBody};
use crate::pipeline::BatchReport;
use crate::service::ServiceState;

pub async fn handle(
    State(state): State<ServiceState>,
    _: Authenticated,
    JsonBody(entries): JsonBody<Vec<serde_json::Value>>,
) -> Result<Json<BatchReport>, BadMetricRequest> {
    let report = state.pipeline().submit_batch(entries).await?;

    if report.rejected > 0 {
        proxy_log::debug!(
            accepted = report.accepted,
            rejected = report.rejected,
            "partially rejected batch"
        );
    }

    Ok(Json(report))
}
