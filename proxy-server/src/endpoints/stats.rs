//! Prometheus exposition of the internal metrics.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use proxy_stats::metric;

use crate::service::ServiceState;
use crate::statsd::ServerGauges;
use crate::utils::ApiErrorResponse;

/// Content type of the Prometheus text format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub async fn handle(State(state): State<ServiceState>) -> Response {
    state.pipeline().report_metrics();
    metric!(gauge(ServerGauges::Uptime) = state.uptime().as_secs_f64());

    let Some(registry) = proxy_stats::current() else {
        return ([(header::CONTENT_TYPE, TEXT_FORMAT)], String::new()).into_response();
    };

    match registry.render() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(error) => {
            proxy_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to render internal metrics"
            );
            let response = ApiErrorResponse::from_error(&error);
            (StatusCode::INTERNAL_SERVER_ERROR, response).into_response()
        }
    }
}
