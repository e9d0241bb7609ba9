use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use proxy_stats::metric;

use crate::service::ServiceState;
use crate::statsd::{ServerCounters, ServerHistograms};

/// Returns the route label of a request, without the root path.
fn route_label<'a>(matched_path: Option<&'a str>, root_path: &str) -> &'a str {
    match matched_path {
        Some(path) => match path.strip_prefix(root_path) {
            Some("") => "/",
            Some(stripped) => stripped,
            None => path,
        },
        None => "unknown",
    }
}

/// A middleware that counts requests and measures their duration.
///
/// Use this with [`axum::middleware::from_fn_with_state`].
pub async fn metrics(State(state): State<ServiceState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let matched_path = request.extensions().get::<MatchedPath>().cloned();

    let response = next.run(request).await;

    let root_path = state.config().root_path();
    let path = route_label(matched_path.as_ref().map(|p| p.as_str()), &root_path);
    let status_code = response.status();

    metric!(
        counter(ServerCounters::Requests) += 1,
        method = method.as_str(),
        path = path,
        status_code = status_code.as_str(),
    );
    metric!(
        histogram(ServerHistograms::RequestDuration) = start.elapsed().as_secs_f64(),
        method = method.as_str(),
        path = path,
        status_code = status_code.as_str(),
    );

    response
}
