use proxy_stats::GaugeMetric;

/// Gauge metrics emitted by the worker pool.
pub enum WorkerPoolGauges {
    /// Number of items waiting in the queue.
    QueueDepth,
}

impl GaugeMetric for WorkerPoolGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::QueueDepth => "metrics_queue_depth",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::QueueDepth => "Number of metrics waiting to be forwarded to StatsD.",
        }
    }
}
