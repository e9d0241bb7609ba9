//! Metric requests and their normalization into StatsD keys.
//!
//! A [`MetricRequest`] as decoded from a request body passes through the [`Normalizer`], which
//! produces an immutable [`NormalizedMetric`]. Normalization is a single pass:
//!
//!  1. The configured prefix is prepended, unless the name already carries it.
//!  2. Name and tags are lowercased, if enabled.
//!  3. In Prometheus mode, the name and tag keys are checked by [`sanitize`]. Names with an
//!     invalid first character are rejected.
//!  4. Tags are parsed with the configured [`TagPolicy`] and embedded into the key as
//!     `name,key=value,key2=value2`.
//!
//! The normalized metric is then handed to a forwarding worker, which calls
//! [`NormalizedMetric::forward`] with the StatsD sink.
//!
//! All rejections and forwarded metrics are recorded in the counters listed in [`ProxyCounters`].

#![warn(missing_docs)]

mod kind;
mod normalize;
mod request;
mod sanitize;
mod statsd;
mod tags;

pub use self::kind::*;
pub use self::normalize::*;
pub use self::request::*;
pub use self::sanitize::*;
pub use self::statsd::*;
pub use self::tags::*;
