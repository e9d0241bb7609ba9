use proxy_statsd::MetricSink;
use proxy_stats::metric;

use crate::{MetricKind, MetricRequest, ProxyCounters, SanitizeError, TagPolicy, parse_tags};

/// An error that rejects a metric during normalization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    /// The request does not declare a metric kind.
    #[error("missing metric kind")]
    MissingKind,
    /// The request has an empty metric name.
    #[error("empty metric name")]
    EmptyName,
    /// The name violates the Prometheus naming rules.
    #[error(transparent)]
    Sanitize(#[from] SanitizeError),
}

/// Turns [`MetricRequest`]s into flat StatsD keys.
#[derive(Clone, Debug, Default)]
pub struct Normalizer {
    /// Prefix prepended to every metric name.
    ///
    /// Must be empty or end in `_`. Names that already start with the prefix keep their name.
    pub prefix: String,
    /// Lowercases names and tags.
    pub normalize_case: bool,
    /// Enforces Prometheus-compatible names, see [`sanitize`](crate::sanitize).
    pub strict_mode: bool,
    /// How malformed tag pairs are handled when embedding tags into the key.
    pub tag_policy: TagPolicy,
}

impl Normalizer {
    /// Normalizes a single metric.
    ///
    /// The steps run in a fixed order: prefixing, case folding, sanitization, and finally tag
    /// embedding. Rejected metrics are counted in `metrics_dropped_total`.
    ///
    /// ```
    /// use proxy_metrics::{MetricKind, MetricRequest, Normalizer};
    ///
    /// let normalizer = Normalizer {
    ///     prefix: "app_".to_owned(),
    ///     ..Default::default()
    /// };
    ///
    /// let metric = normalizer
    ///     .normalize(MetricRequest {
    ///         metric: "request.count".to_owned(),
    ///         value: 5,
    ///         tags: "host=web1,env=prod".to_owned(),
    ///         sample_rate: 0.0,
    ///         metric_type: Some(MetricKind::Count),
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(metric.key(), "app_request.count,host=web1,env=prod");
    /// assert_eq!(metric.sample_rate(), 1.0);
    /// ```
    pub fn normalize(&self, request: MetricRequest) -> Result<NormalizedMetric, NormalizeError> {
        let MetricRequest {
            metric: mut name,
            value,
            mut tags,
            sample_rate,
            metric_type,
        } = request;

        let Some(kind) = metric_type else {
            metric!(counter(ProxyCounters::MetricsDropped) += 1);
            return Err(NormalizeError::MissingKind);
        };

        if name.is_empty() {
            metric!(counter(ProxyCounters::MetricsDropped) += 1);
            return Err(NormalizeError::EmptyName);
        }

        if !self.prefix.is_empty() && !name.starts_with(&self.prefix) {
            name.insert_str(0, &self.prefix);
        }

        if self.normalize_case {
            name.make_ascii_lowercase();
            tags.make_ascii_lowercase();
        }

        let (name, tags) = crate::sanitize(&name, &tags, self.strict_mode)?;

        let mut key = name;
        let tags_start = key.len();
        if !tags.is_empty() {
            key.push_str(&parse_tags(&tags, self.tag_policy).to_string());
        }

        Ok(NormalizedMetric {
            key,
            tags_start,
            value,
            sample_rate: normalize_sample_rate(sample_rate),
            kind,
        })
    }
}

/// Narrows the rate to `(0, 1]`. Rates that round to zero as `f32` count as unsampled.
fn normalize_sample_rate(sample_rate: f64) -> f32 {
    let narrowed = sample_rate as f32;
    if narrowed > 0.0 && narrowed < 1.0 {
        narrowed
    } else {
        1.0
    }
}

/// A metric ready to be forwarded to StatsD.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedMetric {
    key: String,
    tags_start: usize,
    value: i64,
    sample_rate: f32,
    kind: MetricKind,
}

impl NormalizedMetric {
    /// Returns the full StatsD key including the embedded tags.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the metric name without tags.
    pub fn name(&self) -> &str {
        &self.key[..self.tags_start]
    }

    /// Returns the embedded tags as a comma-separated list without leading comma.
    pub fn tags(&self) -> &str {
        self.key[self.tags_start..].trim_start_matches(',')
    }

    /// Returns the payload.
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Returns the sample rate in `(0, 1]`.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Returns the metric kind.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Sends the metric through the sink operation matching its kind.
    ///
    /// Forwarded metrics are counted per kind. Sink failures are logged and counted in
    /// `metrics_send_failures_total`, the metric is dropped.
    pub fn forward(&self, sink: &dyn MetricSink) {
        let result = match self.kind {
            MetricKind::Count => sink.count(&self.key, self.value, self.sample_rate),
            MetricKind::Gauge => sink.gauge(&self.key, self.value),
            MetricKind::Timing => sink.timing(&self.key, self.value, self.sample_rate),
            MetricKind::Set => sink.set(&self.key, self.value),
        };

        match result {
            Ok(()) => metric!(counter(self.kind.added_counter()) += 1),
            Err(error) => {
                proxy_log::debug!(
                    error = &error as &dyn std::error::Error,
                    key = self.key.as_str(),
                    kind = %self.kind,
                    "failed to forward metric"
                );
                metric!(
                    counter(ProxyCounters::SendFailures) += 1,
                    kind = self.kind.as_str()
                );
            }
        }
    }
}
