//! The statsd HTTP proxy accepts metrics over HTTP and forwards them to a StatsD daemon.
//!
//! Clients that cannot speak UDP, such as browsers, post single observations or batches as JSON.
//! The proxy validates and normalizes every metric and hands it to a bounded queue, from which a
//! pool of worker threads writes StatsD lines to the configured daemon.
//!
//! # Usage
//!
//! ```text
//! statsd-http-proxy run --http-port 8825 --statsd-host 10.0.0.2 --metric-prefix app
//! statsd-http-proxy config show
//! ```
//!
//! Every flag of `run` can also be set through an environment variable with the
//! `STATSD_PROXY_` prefix, for example `STATSD_PROXY_JWT_SECRET`.
//!
//! # Workspace Crates
//!
//!  - `proxy`: Main entry point and command line interface.
//!  - [`proxy-auth`]: Verification of JSON web tokens.
//!  - [`proxy-config`]: Static configuration for the CLI and server.
//!  - [`proxy-log`]: Error reporting and logging.
//!  - [`proxy-metrics`]: Metric requests, tag parsing and normalization.
//!  - [`proxy-server`]: Endpoints and server lifecycle.
//!  - [`proxy-stats`]: Internal operation counters exposed on `/metrics`.
//!  - [`proxy-statsd`]: The StatsD backend sink.
//!  - [`proxy-threading`]: The ingestion queue and forwarding worker pool.
//!
//! [`proxy-auth`]: ../proxy_auth/index.html
//! [`proxy-config`]: ../proxy_config/index.html
//! [`proxy-log`]: ../proxy_log/index.html
//! [`proxy-metrics`]: ../proxy_metrics/index.html
//! [`proxy-server`]: ../proxy_server/index.html
//! [`proxy-stats`]: ../proxy_stats/index.html
//! [`proxy-statsd`]: ../proxy_statsd/index.html
//! [`proxy-threading`]: ../proxy_threading/index.html

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            proxy_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
