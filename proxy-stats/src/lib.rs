//! Internal operation counters of the proxy, exposed in the Prometheus text format.
//!
//! ## Defining Metrics
//!
//! In order to use metrics, one needs to first implement one of the metric traits on a custom
//! enum. The following types of metrics are available: `counter`, `gauge`, and `histogram`.
//!
//! The metric traits serve only to provide a type safe metric name and its help text. All metric
//! types have exactly the same form, they are different only to ensure that a metric can only be
//! used for the type for which it was defined, (e.g. a counter metric cannot be used as a gauge).
//!
//! ## Initializing the Registry
//!
//! Metrics can be used without initializing a registry. In that case, invoking `with_registry` or
//! the [`metric!`] macro will become a noop. Only when configured, metrics will actually be
//! collected.
//!
//! ```
//! let registry = proxy_stats::init();
//! assert!(registry.render().is_ok());
//! ```
//!
//! ## Macro Usage
//!
//! ```
//! use proxy_stats::{metric, CounterMetric};
//!
//! struct MyCounter;
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         "my_counter_total"
//!     }
//!
//!     fn description(&self) -> &'static str {
//!         "Number of things that happened."
//!     }
//! }
//!
//! let registry = proxy_stats::with_test_registry(|| {
//!     metric!(counter(MyCounter) += 1, route = "/count");
//! });
//!
//! assert_eq!(registry.counter_value("my_counter_total", &[("route", "/count")]), 1);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::string::FromUtf8Error;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Histogram buckets in seconds, tuned for request latencies of a local proxy.
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// An error raised when rendering the registry.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// The prometheus encoder failed.
    #[error("failed to encode metrics")]
    Encode(#[from] prometheus::Error),
    /// The encoder produced invalid text.
    #[error("metrics exposition is not valid utf-8")]
    Utf8(#[from] FromUtf8Error),
}

/// A lazily populated collection of Prometheus collectors.
///
/// Collectors are created on first use, keyed by name. The label names passed on first use fix
/// the label set of a metric for the lifetime of the registry.
#[derive(Default)]
pub struct StatsRegistry {
    registry: Registry,
    counters: Mutex<HashMap<&'static str, IntCounterVec>>,
    gauges: Mutex<HashMap<&'static str, GaugeVec>>,
    histograms: Mutex<HashMap<&'static str, HistogramVec>>,
}

impl StatsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` to the counter identified by `name` and `labels`.
    pub fn add_counter(
        &self,
        name: &'static str,
        description: &'static str,
        labels: &[(&str, &str)],
        value: u64,
    ) {
        let mut counters = self.counters.lock();
        let Some(vec) = get_or_register(&self.registry, &mut counters, name, labels, |names| {
            IntCounterVec::new(Opts::new(name, description), names)
        }) else {
            return;
        };

        match vec.get_metric_with_label_values(&label_values(labels)) {
            Ok(counter) => counter.inc_by(value),
            Err(error) => log_label_error(name, &error),
        }
    }

    /// Sets the gauge identified by `name` and `labels` to `value`.
    pub fn set_gauge(
        &self,
        name: &'static str,
        description: &'static str,
        labels: &[(&str, &str)],
        value: f64,
    ) {
        let mut gauges = self.gauges.lock();
        let Some(vec) = get_or_register(&self.registry, &mut gauges, name, labels, |names| {
            GaugeVec::new(Opts::new(name, description), names)
        }) else {
            return;
        };

        match vec.get_metric_with_label_values(&label_values(labels)) {
            Ok(gauge) => gauge.set(value),
            Err(error) => log_label_error(name, &error),
        }
    }

    /// Records an observation in the histogram identified by `name` and `labels`.
    pub fn observe_histogram(
        &self,
        name: &'static str,
        description: &'static str,
        labels: &[(&str, &str)],
        value: f64,
    ) {
        let mut histograms = self.histograms.lock();
        let Some(vec) = get_or_register(&self.registry, &mut histograms, name, labels, |names| {
            let opts = HistogramOpts::new(name, description).buckets(LATENCY_BUCKETS.to_vec());
            HistogramVec::new(opts, names)
        }) else {
            return;
        };

        match vec.get_metric_with_label_values(&label_values(labels)) {
            Ok(histogram) => histogram.observe(value),
            Err(error) => log_label_error(name, &error),
        }
    }

    /// Returns the current value of a counter, or `0` if it has never been incremented.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .get(name)
            .and_then(|vec| vec.get_metric_with_label_values(&label_values(labels)).ok())
            .map_or(0, |counter| counter.get())
    }

    /// Returns the current value of a gauge, or `None` if it has never been set.
    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges
            .lock()
            .get(name)
            .and_then(|vec| vec.get_metric_with_label_values(&label_values(labels)).ok())
            .map(|gauge| gauge.get())
    }

    /// Returns the number of observations recorded by a histogram.
    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.histograms
            .lock()
            .get(name)
            .and_then(|vec| vec.get_metric_with_label_values(&label_values(labels)).ok())
            .map_or(0, |histogram| histogram.get_sample_count())
    }

    /// Renders all collected metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, StatsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for StatsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsRegistry")
            .field("counters", &self.counters.lock().len())
            .field("gauges", &self.gauges.lock().len())
            .field("histograms", &self.histograms.lock().len())
            .finish()
    }
}

fn label_values<'a>(labels: &[(&str, &'a str)]) -> Vec<&'a str> {
    labels.iter().map(|(_, value)| *value).collect()
}

fn log_label_error(name: &str, error: &prometheus::Error) {
    proxy_log::error!(
        error = error as &dyn std::error::Error,
        metric = name,
        "inconsistent labels for internal metric"
    );
}

fn get_or_register<C, F>(
    registry: &Registry,
    collectors: &mut HashMap<&'static str, C>,
    name: &'static str,
    labels: &[(&str, &str)],
    create: F,
) -> Option<C>
where
    C: prometheus::core::Collector + Clone + 'static,
    F: FnOnce(&[&str]) -> prometheus::Result<C>,
{
    if let Some(collector) = collectors.get(name) {
        return Some(collector.clone());
    }

    let names: Vec<&str> = labels.iter().map(|(key, _)| *key).collect();
    let collector = create(&names).and_then(|collector| {
        registry.register(Box::new(collector.clone()))?;
        Ok(collector)
    });

    match collector {
        Ok(collector) => {
            collectors.insert(name, collector.clone());
            Some(collector)
        }
        Err(error) => {
            proxy_log::error!(
                error = &error as &dyn std::error::Error,
                metric = name,
                "failed to register internal metric"
            );
            None
        }
    }
}

static GLOBAL_REGISTRY: RwLock<Option<Arc<StatsRegistry>>> = RwLock::new(None);

thread_local! {
    static CURRENT_REGISTRY: RefCell<Option<Arc<StatsRegistry>>> =
        GLOBAL_REGISTRY.read().clone().into();
}

/// Creates a new registry and installs it globally.
pub fn init() -> Arc<StatsRegistry> {
    let registry = Arc::new(StatsRegistry::new());
    set_registry(registry.clone());
    registry
}

/// Installs a registry globally and on the current thread.
///
/// Threads that have already recorded metrics keep their previous registry.
pub fn set_registry(registry: Arc<StatsRegistry>) {
    *GLOBAL_REGISTRY.write() = Some(registry.clone());
    CURRENT_REGISTRY.with(|cell| cell.replace(Some(registry)));
}

/// Returns the registry used by the current thread.
pub fn current() -> Option<Arc<StatsRegistry>> {
    CURRENT_REGISTRY.with(|cell| cell.borrow().clone())
}

/// Binds the current thread to the given registry.
///
/// Threads spawned on behalf of another thread use this to record into the same registry as their
/// parent, see [`current`].
pub fn bind(registry: Option<Arc<StatsRegistry>>) {
    CURRENT_REGISTRY.with(|cell| cell.replace(registry));
}

/// Restores the previously bound registry of a thread when dropped.
#[must_use = "the registry is unbound when the guard is dropped"]
pub struct RegistryGuard {
    previous: Option<Arc<StatsRegistry>>,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        bind(self.previous.take());
    }
}

/// Binds the current thread to `registry` until the returned guard is dropped.
pub fn enter(registry: Arc<StatsRegistry>) -> RegistryGuard {
    let previous = CURRENT_REGISTRY.with(|cell| cell.replace(Some(registry)));
    RegistryGuard { previous }
}

/// Runs `f` with a fresh registry bound to the current thread and returns the registry.
pub fn with_test_registry(f: impl FnOnce()) -> Arc<StatsRegistry> {
    let registry = Arc::new(StatsRegistry::new());
    let guard = enter(registry.clone());
    f();
    drop(guard);
    registry
}

/// Invoke a callback with the current registry.
///
/// If no registry is configured the callback is not invoked. For the most part the [`metric!`]
/// macro should be used instead.
#[inline(always)]
pub fn with_registry<F, R>(f: F) -> R
where
    F: FnOnce(&StatsRegistry) -> R,
    R: Default,
{
    CURRENT_REGISTRY.with(|cell| match cell.borrow().as_deref() {
        Some(registry) => f(registry),
        None => R::default(),
    })
}

/// A metric for capturing counters.
///
/// Counters are monotonically increasing values. Examples of counter uses include the number of
/// metrics forwarded to StatsD or the number of rejected requests.
///
/// ## Example
///
/// ```
/// use proxy_stats::{metric, CounterMetric};
///
/// enum MyCounter {
///     TotalRequests,
///     TotalBytes,
/// }
///
/// impl CounterMetric for MyCounter {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::TotalRequests => "total_requests",
///             Self::TotalBytes => "total_bytes",
///         }
///     }
///
///     fn description(&self) -> &'static str {
///         match self {
///             Self::TotalRequests => "Number of requests.",
///             Self::TotalBytes => "Number of bytes received.",
///         }
///     }
/// }
///
/// # let buffer = &[(), ()];
///
/// // add to the counter
/// metric!(counter(MyCounter::TotalRequests) += 1);
/// metric!(counter(MyCounter::TotalBytes) += buffer.len() as u64);
///
/// // add to the counter and provide labels
/// metric!(
///     counter(MyCounter::TotalRequests) += 1,
///     server = "s1",
///     host = "h1"
/// );
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name that will be exposed.
    fn name(&self) -> &'static str;

    /// Returns the help text of the metric.
    fn description(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement of a value determined by the client, such as
/// the current depth of a queue.
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be exposed.
    fn name(&self) -> &'static str;

    /// Returns the help text of the metric.
    fn description(&self) -> &'static str;
}

/// A metric for capturing distributions of durations in seconds.
pub trait HistogramMetric {
    /// Returns the histogram metric name that will be exposed.
    fn name(&self) -> &'static str;

    /// Returns the help text of the metric.
    fn description(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::with_registry(|registry| {
            registry.add_counter(
                $crate::CounterMetric::name(&$id),
                $crate::CounterMetric::description(&$id),
                &[$((stringify!($k), ::std::convert::AsRef::<str>::as_ref(&$v))),*],
                $value,
            )
        })
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::with_registry(|registry| {
            registry.set_gauge(
                $crate::GaugeMetric::name(&$id),
                $crate::GaugeMetric::description(&$id),
                &[$((stringify!($k), ::std::convert::AsRef::<str>::as_ref(&$v))),*],
                $value,
            )
        })
    };

    // histogram observation in seconds
    (histogram($id:expr) = $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::with_registry(|registry| {
            registry.observe_histogram(
                $crate::HistogramMetric::name(&$id),
                $crate::HistogramMetric::description(&$id),
                &[$((stringify!($k), ::std::convert::AsRef::<str>::as_ref(&$v))),*],
                $value,
            )
        })
    };
}
