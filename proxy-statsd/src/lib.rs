//! The StatsD backend of the proxy.
//!
//! Workers forward every normalized metric through the [`MetricSink`] trait. The production
//! implementation is [`StatsdSink`], a thin wrapper around a [`cadence`] client that writes the
//! StatsD line protocol over UDP:
//!
//! ```no_run
//! use proxy_statsd::{MetricSink, StatsdSink};
//!
//! let sink = StatsdSink::open("127.0.0.1", 8125, 100_000).unwrap();
//! sink.count("app_requests,host=web1", 1, 1.0).unwrap();
//! sink.close().unwrap();
//! ```
//!
//! For tests, [`StatsdSink::capturing`] returns a sink that records every line in memory.

use std::net::UdpSocket;

use cadence::prelude::*;
use cadence::{MetricBuilder, QueuingMetricSink, SpyMetricSink, StatsdClient, UdpMetricSink};

/// An error returned by a [`MetricSink`] operation.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The local UDP socket could not be set up.
    #[error("failed to bind statsd socket")]
    Socket(#[from] std::io::Error),
    /// The StatsD client rejected or failed to write the metric.
    #[error("failed to send metric to statsd")]
    Send(#[from] cadence::MetricError),
    /// The value cannot be represented by the metric type.
    #[error("invalid value {0} for {1} metric")]
    InvalidValue(i64, &'static str),
}

/// The operations a forwarding worker needs from the backend.
///
/// Implementations are shared between all workers and must therefore be safe for concurrent use.
/// Keys already carry their embedded tags (`name,key=value`), so implementations send them
/// verbatim.
pub trait MetricSink: Send + Sync {
    /// Adds `delta` to a counter.
    fn count(&self, key: &str, delta: i64, sample_rate: f32) -> Result<(), SinkError>;

    /// Sets a gauge to the absolute `level`, which may be negative.
    fn gauge(&self, key: &str, level: i64) -> Result<(), SinkError>;

    /// Records a duration in milliseconds.
    fn timing(&self, key: &str, duration_ms: i64, sample_rate: f32) -> Result<(), SinkError>;

    /// Adds `member` to a set.
    fn set(&self, key: &str, member: i64) -> Result<(), SinkError>;

    /// Flushes buffered metrics. Called once during shutdown.
    fn close(&self) -> Result<(), SinkError>;
}

/// A [`MetricSink`] that writes to a StatsD daemon.
///
/// The sink is safe for concurrent use: the [`StatsdClient`] formats lines on the calling thread
/// and hands them to a [`QueuingMetricSink`], whose single background thread owns the socket.
/// When that queue is full, metrics are rejected with [`SinkError::Send`].
#[derive(Debug)]
pub struct StatsdSink {
    client: StatsdClient,
}

impl StatsdSink {
    /// Opens a sink sending to `host:port`.
    ///
    /// `max_queue_size` bounds the number of lines buffered in front of the socket.
    pub fn open(host: &str, port: u16, max_queue_size: usize) -> Result<Self, SinkError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;

        let udp_sink = UdpMetricSink::from((host, port), socket)?;
        let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, max_queue_size);

        proxy_log::info!("forwarding metrics to statsd at {host}:{port}");

        Ok(Self {
            client: StatsdClient::from_sink("", queuing_sink),
        })
    }

    /// Creates a sink that captures all sent lines.
    ///
    /// Every metric is delivered to the returned receiver as one line without trailing newline.
    pub fn capturing() -> (crossbeam_channel::Receiver<Vec<u8>>, Self) {
        let (receiver, sink) = SpyMetricSink::new();
        let client = StatsdClient::from_sink("", sink);
        (receiver, Self { client })
    }
}

fn send_sampled<T>(builder: MetricBuilder<'_, '_, T>, sample_rate: f32) -> Result<(), SinkError>
where
    T: cadence::Metric + From<String>,
{
    let builder = if sample_rate < 1.0 {
        builder.with_sampling_rate(f64::from(sample_rate))
    } else {
        builder
    };

    builder.try_send()?;
    Ok(())
}

impl MetricSink for StatsdSink {
    fn count(&self, key: &str, delta: i64, sample_rate: f32) -> Result<(), SinkError> {
        send_sampled(self.client.count_with_tags(key, delta), sample_rate)
    }

    fn gauge(&self, key: &str, level: i64) -> Result<(), SinkError> {
        match u64::try_from(level) {
            Ok(level) => self.client.gauge_with_tags(key, level).try_send()?,
            Err(_) => {
                // A signed gauge value is a relative shift in StatsD, so reset to zero first.
                self.client.gauge_with_tags(key, 0u64).try_send()?;
                self.client.gauge_with_tags(key, level as f64).try_send()?
            }
        };
        Ok(())
    }

    fn timing(&self, key: &str, duration_ms: i64, sample_rate: f32) -> Result<(), SinkError> {
        let duration_ms =
            u64::try_from(duration_ms).map_err(|_| SinkError::InvalidValue(duration_ms, "timing"))?;
        send_sampled(self.client.time_with_tags(key, duration_ms), sample_rate)
    }

    fn set(&self, key: &str, member: i64) -> Result<(), SinkError> {
        self.client.set_with_tags(key, member).try_send()?;
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        self.client.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn drain(receiver: &crossbeam_channel::Receiver<Vec<u8>>) -> Vec<String> {
        receiver
            .try_iter()
            .map(|line| String::from_utf8(line).unwrap())
            .collect()
    }

    #[test]
    fn test_all_kinds() {
        let (receiver, sink) = StatsdSink::capturing();

        sink.count("app_request.count,host=web1,env=prod", 5, 1.0)
            .unwrap();
        sink.gauge("queue_depth", 12).unwrap();
        sink.timing("db_query,table=users", 250, 1.0).unwrap();
        sink.set("unique_users", 42).unwrap();
        sink.close().unwrap();

        assert_eq!(
            drain(&receiver),
            vec![
                "app_request.count,host=web1,env=prod:5|c",
                "queue_depth:12|g",
                "db_query,table=users:250|ms",
                "unique_users:42|s",
            ]
        );
    }

    #[test]
    fn test_sample_rate_annotation() {
        let (receiver, sink) = StatsdSink::capturing();

        sink.count("sampled", 1, 0.5).unwrap();
        sink.timing("sampled_timing", 10, 0.25).unwrap();

        assert_eq!(
            drain(&receiver),
            vec!["sampled:1|c|@0.5", "sampled_timing:10|ms|@0.25"]
        );
    }

    #[test]
    fn test_negative_values() {
        let (receiver, sink) = StatsdSink::capturing();

        sink.count("decrement", -3, 1.0).unwrap();
        sink.set("members", -7).unwrap();
        sink.gauge("temperature", -5).unwrap();
        assert!(matches!(
            sink.timing("negative", -1, 1.0),
            Err(SinkError::InvalidValue(-1, "timing"))
        ));

        assert_eq!(
            drain(&receiver),
            vec![
                "decrement:-3|c",
                "members:-7|s",
                "temperature:0|g",
                "temperature:-5|g",
            ]
        );
    }
}
