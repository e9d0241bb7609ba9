//! Web server endpoints.
//!
//! All routes are served below the configured root path.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use proxy_config::Config;

use crate::service::ServiceState;

mod batch;
pub(crate) mod common;
mod heartbeat;
mod stats;
mod store;

/// Returns all routes of the proxy.
pub fn routes(config: &Config) -> Router<ServiceState> {
    // Static segments take precedence over the `{kind}` parameter.
    let router = Router::new()
        .route("/heartbeat", get(heartbeat::handle))
        .route("/metrics", get(stats::handle))
        .route("/batch", post(batch::handle))
        .route("/{kind}", post(store::handle))
        .route("/{kind}/{name}", post(store::handle_named))
        .layer(DefaultBodyLimit::max(config.max_body_size()));

    match config.root_path().as_str() {
        "" => router,
        root_path => Router::new().nest(root_path, router),
    }
}
