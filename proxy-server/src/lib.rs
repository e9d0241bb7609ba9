//! The HTTP server of the statsd HTTP proxy.
//!
//! The server accepts metrics as JSON, normalizes them, and queues them for a pool of workers that
//! forward them to StatsD. The main entry point is [`run`], which blocks until the process receives
//! a termination signal and all queued metrics have been forwarded.
//!
//! # Endpoints
//!
//! All endpoints are served below the configured root path:
//!
//! | Route                 | Description                                         |
//! |-----------------------|-----------------------------------------------------|
//! | `GET /heartbeat`      | Responds with `OK`.                                 |
//! | `GET /metrics`        | Internal counters in the Prometheus text format.    |
//! | `POST /batch`         | A JSON array of metrics, each with a `metric_type`. |
//! | `POST /{kind}`        | A single metric of the given kind.                  |
//! | `POST /{kind}/{name}` | A single metric, with the name taken from the path. |
//!
//! Submissions require a JSON web token in the `X-JWT-Token` header or the `token` query parameter
//! if a JWT secret is configured.
//!
//! # Shutdown
//!
//! On `SIGINT` or `SIGTERM`, the [`Controller`] broadcasts a [`Shutdown`]. The server then
//!
//! 1. closes the metric queue, so that new submissions are answered with `503`,
//! 2. waits up to the shutdown timeout for open connections,
//! 3. waits for the workers to forward all queued metrics,
//! 4. and finally flushes the StatsD client.

use std::sync::Arc;

use anyhow::Context;
use proxy_config::Config;
use proxy_statsd::StatsdSink;

mod controller;
mod endpoints;
mod extractors;
mod middlewares;
mod pipeline;
mod server;
mod service;
mod statsd;
mod utils;

pub use self::controller::*;
pub use self::extractors::JWT_HEADER;
pub use self::pipeline::*;
pub use self::server::{HttpServer, ServerError, make_app};
pub use self::service::ServiceState;
pub use self::utils::ApiErrorResponse;

/// Runs the proxy until it is shut down.
///
/// This creates the async runtime, opens the StatsD sink, spawns the forwarding workers, and
/// serves HTTP requests until a termination signal is received.
pub fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    proxy_log::info!("proxy server starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("proxy-http")
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(serve(config))?;

    proxy_log::info!("proxy shutdown complete");
    Ok(())
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let controller = Controller::new(config.shutdown_timeout());
    controller.start();

    let sink = StatsdSink::open(
        config.statsd_host(),
        config.statsd_port(),
        config.statsd_max_queue_size(),
    )
    .context("failed to open statsd sink")?;

    let pipeline = Pipeline::from_config(&config, Arc::new(sink))
        .context("failed to spawn forwarding workers")?;
    let pipeline = Arc::new(pipeline);

    let state = ServiceState::new(config.clone(), pipeline.clone());
    let result = match HttpServer::new(state).await {
        Ok(server) => server
            .run(controller.shutdown_handle())
            .await
            .context("http server failed"),
        Err(error) => Err(error.into()),
    };

    tokio::task::spawn_blocking(move || pipeline.shutdown())
        .await
        .context("failed to stop forwarding workers")?;

    result
}
