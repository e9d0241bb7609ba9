use proxy_stats::CounterMetric;

/// Counter metrics recorded by the metric pipeline.
pub enum ProxyCounters {
    /// Number of count metrics forwarded to StatsD.
    CountersAdded,
    /// Number of gauge metrics forwarded to StatsD.
    GaugesAdded,
    /// Number of timing metrics forwarded to StatsD.
    TimingAdded,
    /// Number of set metrics forwarded to StatsD.
    SetAdded,
    /// Number of metrics rejected before they were queued.
    ///
    /// Incremented for names with an invalid first character in Prometheus mode, for empty names,
    /// and for batch entries without a valid kind.
    MetricsDropped,
    /// Number of malformed tag pairs dropped by the lenient tag policy.
    TagsDropped,
    /// Number of metrics the StatsD sink failed to send.
    ///
    /// This metric is tagged with:
    /// - `kind`: the metric kind.
    SendFailures,
}

impl CounterMetric for ProxyCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::CountersAdded => "counters_added_total",
            Self::GaugesAdded => "gauges_added_total",
            Self::TimingAdded => "timing_added_total",
            Self::SetAdded => "set_added_total",
            Self::MetricsDropped => "metrics_dropped_total",
            Self::TagsDropped => "metrics_tags_dropped_total",
            Self::SendFailures => "metrics_send_failures_total",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::CountersAdded => "Number of count metrics forwarded to StatsD.",
            Self::GaugesAdded => "Number of gauge metrics forwarded to StatsD.",
            Self::TimingAdded => "Number of timing metrics forwarded to StatsD.",
            Self::SetAdded => "Number of set metrics forwarded to StatsD.",
            Self::MetricsDropped => "Number of metrics rejected before queueing.",
            Self::TagsDropped => "Number of malformed tag pairs dropped.",
            Self::SendFailures => "Number of metrics the StatsD sink failed to send.",
        }
    }
}
