//! Error reporting and logging for the StatsD HTTP proxy.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it can be obtained from configuration files.
//!
//! ```
//! use proxy_log::{LogConfig, LogFormat, Level};
//!
//! let log_config = LogConfig {
//!     level: Level::Debug,
//!     format: LogFormat::Json,
//!     ..LogConfig::default()
//! };
//!
//! proxy_log::init(&log_config);
//! ```
//!
//! # Logging
//!
//! The basic use of the log crate is through the five logging macros: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`] where `error!` represents the highest-priority log messages
//! and `trace!` the lowest. The log messages are filtered by configuring the log level to exclude
//! messages with a lower priority. Each of these macros accept format strings similarly to
//! [`println!`].
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior. This is reserved for conditions that the proxy
//!   cannot recover from, such as a failing socket.
//! - [`warn!`] for undesirable behavior caused by clients, such as an unknown metric kind.
//! - [`info!`] for messages relevant to the operator, such as the startup banner.
//! - [`debug!`] for messages that help debug a specific metric, such as a dropped tag.
//! - [`trace!`] for full auxiliary information.
//!
//! ## Logging Error Types
//!
//! To log errors to both the console and any structured output, pass them with the `error` field
//! and a reference to `dyn Error`:
//!
//! ```
//! let custom_error = std::io::Error::other("oops");
//!
//! proxy_log::error!(error = &custom_error as &dyn std::error::Error, "operation failed");
//! ```
//!
//! Alternatively, use [`LogError`] to render the error together with its chain of causes.
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of the test method. It enables test mode of the logger and customizes log
//! levels for the current crate.
//!
//! ```no_run
//! #[test]
//! fn test_something() {
//!     proxy_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

mod setup;
pub use setup::*;

mod test;
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, enabled, error, info, trace, warn};
