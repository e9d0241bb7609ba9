//! Configuration for the proxy CLI and server.
//!
//! The configuration is read from an optional `config.yml` in a configuration folder and can be
//! overridden field by field from the command line or the environment, see
//! [`OverridableConfig`].
//!
//! ```yaml
//! http:
//!   host: 127.0.0.1
//!   port: 8825
//! statsd:
//!   host: 127.0.0.1
//!   port: 8125
//! processing:
//!   metric_prefix: app
//!   prometheus_compat: true
//!   workers: 4
//! ```

#![warn(missing_docs)]

mod config;

pub use crate::config::*;
