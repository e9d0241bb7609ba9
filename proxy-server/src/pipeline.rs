use std::io;
use std::sync::Arc;

use proxy_config::Config;
use proxy_metrics::{MetricRequest, NormalizeError, NormalizedMetric, Normalizer, ProxyCounters};
use proxy_stats::metric;
use proxy_statsd::MetricSink;
use proxy_threading::{QueueClosed, WorkerPool, WorkerPoolBuilder, panic_message};
use serde::Serialize;

/// An error returned when a metric cannot be submitted.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The metric was rejected during normalization.
    #[error(transparent)]
    Rejected(#[from] NormalizeError),
    /// The pipeline is shutting down and accepts no more metrics.
    #[error("metric queue is closed")]
    QueueClosed,
}

impl<T> From<QueueClosed<T>> for SubmitError {
    fn from(_: QueueClosed<T>) -> Self {
        Self::QueueClosed
    }
}

/// A rejected entry of a batch submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntryError {
    /// Position of the entry in the submitted array.
    pub index: usize,
    /// Reason for the rejection.
    pub error: String,
}

/// Outcome of a batch submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Number of entries queued for forwarding.
    pub accepted: usize,
    /// Number of entries that were dropped.
    pub rejected: usize,
    /// Rejection reasons, one per dropped entry.
    pub errors: Vec<BatchEntryError>,
}

impl BatchReport {
    fn reject(&mut self, index: usize, error: impl ToString) {
        self.rejected += 1;
        self.errors.push(BatchEntryError {
            index,
            error: error.to_string(),
        });
    }
}

/// Normalizes submitted metrics and queues them for the forwarding workers.
///
/// The pipeline owns the ingestion queue, the worker threads draining it, and the sink they
/// forward to. HTTP handlers share it through the service state.
pub struct Pipeline {
    normalizer: Normalizer,
    pool: WorkerPool<NormalizedMetric>,
    sink: Arc<dyn MetricSink>,
}

impl Pipeline {
    /// Creates a pipeline and spawns its workers.
    pub fn new(
        normalizer: Normalizer,
        sink: Arc<dyn MetricSink>,
        builder: WorkerPoolBuilder,
    ) -> io::Result<Self> {
        let worker_sink = sink.clone();
        let pool = builder.build(move |metric: NormalizedMetric| metric.forward(&*worker_sink))?;

        Ok(Self {
            normalizer,
            pool,
            sink,
        })
    }

    /// Creates a pipeline from the processing options of the config.
    pub fn from_config(config: &Config, sink: Arc<dyn MetricSink>) -> io::Result<Self> {
        let normalizer = Normalizer {
            prefix: config.metric_prefix(),
            normalize_case: config.normalize(),
            strict_mode: config.prometheus_compat(),
            tag_policy: config.tag_policy(),
        };

        let builder = WorkerPoolBuilder::new()
            .num_threads(config.workers())
            .queue_size(config.queue_size())
            .thread_name(|index| format!("proxy-forwarder-{index}"))
            .task_panic_handler(|panic| {
                proxy_log::error!("panic while forwarding metric: {}", panic_message(&*panic));
            })
            .thread_panic_handler(|panic| {
                proxy_log::error!("forwarder thread panicked: {}", panic_message(&*panic));
            });

        Self::new(normalizer, sink, builder)
    }

    /// Normalizes a metric and queues it.
    ///
    /// Waits for a free slot while the queue is full.
    pub async fn submit(&self, request: MetricRequest) -> Result<(), SubmitError> {
        let metric = self.normalizer.normalize(request)?;
        self.pool.send_async(metric).await?;
        Ok(())
    }

    /// Submits every entry of a batch.
    ///
    /// Entries are decoded and normalized independently. Invalid entries are counted as dropped
    /// and reported, the remaining entries are still queued. Fails only if the queue was closed.
    pub async fn submit_batch(
        &self,
        entries: Vec<serde_json::Value>,
    ) -> Result<BatchReport, SubmitError> {
        let mut report = BatchReport::default();

        for (index, entry) in entries.into_iter().enumerate() {
            let request = match serde_json::from_value::<MetricRequest>(entry) {
                Ok(request) => request,
                Err(error) => {
                    proxy_log::warn!(
                        error = &error as &dyn std::error::Error,
                        index,
                        "invalid metric in batch"
                    );
                    metric!(counter(ProxyCounters::MetricsDropped) += 1);
                    report.reject(index, error);
                    continue;
                }
            };

            match self.submit(request).await {
                Ok(()) => report.accepted += 1,
                Err(SubmitError::Rejected(error)) => {
                    proxy_log::debug!(index, "rejected metric in batch: {error}");
                    report.reject(index, error);
                }
                Err(error @ SubmitError::QueueClosed) => return Err(error),
            }
        }

        Ok(report)
    }

    /// Returns the number of metrics waiting to be forwarded.
    pub fn queue_len(&self) -> usize {
        self.pool.len()
    }

    /// Returns the capacity of the ingestion queue.
    pub fn queue_capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Reports the queue depth to the internal metrics.
    pub fn report_metrics(&self) {
        self.pool.report_metrics();
    }

    /// Closes the queue. Later submissions fail with [`SubmitError::QueueClosed`].
    pub fn close(&self) {
        if self.pool.close() {
            proxy_log::info!("closed metric queue, {} metrics pending", self.queue_len());
        }
    }

    /// Returns `true` once the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Closes the queue, waits for the workers to forward all pending metrics, and closes the sink.
    ///
    /// This blocks the current thread.
    pub fn shutdown(&self) {
        self.close();
        self.pool.join();

        if let Err(error) = self.sink.close() {
            proxy_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to flush statsd sink"
            );
        }

        proxy_log::info!("metric pipeline stopped");
    }
}
