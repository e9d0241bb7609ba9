use serde::{Deserialize, Serialize};

use crate::MetricKind;

/// A single metric as submitted in a request body.
///
/// All fields are optional on the wire. Unknown fields are ignored.
///
/// ```
/// use proxy_metrics::{MetricKind, MetricRequest};
///
/// let request: MetricRequest = serde_json::from_str(
///     r#"{"metric": "request.count", "value": 5, "tags": "host=web1", "metric_type": "count"}"#,
/// )
/// .unwrap();
///
/// assert_eq!(request.metric, "request.count");
/// assert_eq!(request.metric_type, Some(MetricKind::Count));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricRequest {
    /// The metric name.
    pub metric: String,
    /// The payload, interpreted according to the kind.
    pub value: i64,
    /// Raw comma-separated `key=value` tags.
    pub tags: String,
    /// Sample rate in `(0, 1]`. Zero means unsampled.
    #[serde(rename = "sampleRate")]
    pub sample_rate: f64,
    /// The metric kind. Single-metric routes take it from the path, see [`MetricPayload`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<MetricKind>,
}

/// The body of a single-metric route.
///
/// The kind comes from the path, so a `metric_type` field in the body is ignored like any other
/// unknown field.
///
/// ```
/// use proxy_metrics::{MetricKind, MetricPayload};
///
/// let payload: MetricPayload =
///     serde_json::from_str(r#"{"metric": "x", "value": 1, "metric_type": "counter"}"#).unwrap();
///
/// let request = payload.into_request(MetricKind::Count);
/// assert_eq!(request.metric_type, Some(MetricKind::Count));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricPayload {
    /// The metric name.
    pub metric: String,
    /// The payload, interpreted according to the kind.
    pub value: i64,
    /// Raw comma-separated `key=value` tags.
    pub tags: String,
    /// Sample rate in `(0, 1]`. Zero means unsampled.
    #[serde(rename = "sampleRate")]
    pub sample_rate: f64,
}

impl MetricPayload {
    /// Completes the payload with the kind taken from the route.
    pub fn into_request(self, kind: MetricKind) -> MetricRequest {
        MetricRequest {
            metric: self.metric,
            value: self.value,
            tags: self.tags,
            sample_rate: self.sample_rate,
            metric_type: Some(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let request: MetricRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, MetricRequest::default());
        assert_eq!(request.sample_rate, 0.0);
        assert_eq!(request.metric_type, None);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let request: MetricRequest = serde_json::from_str(
            r#"{"metric": "latency", "value": -12, "sampleRate": 0.5, "unit": "ms"}"#,
        )
        .unwrap();

        insta::assert_debug_snapshot!(request, @r#"
        MetricRequest {
            metric: "latency",
            value: -12,
            tags: "",
            sample_rate: 0.5,
            metric_type: None,
        }
        "#);
    }

    #[test]
    fn test_invalid_value_type() {
        assert!(serde_json::from_str::<MetricRequest>(r#"{"value": "12"}"#).is_err());
        assert!(serde_json::from_str::<MetricRequest>(r#"{"metric_type": "meter"}"#).is_err());
    }

    #[test]
    fn test_payload_ignores_metric_type() {
        let payload: MetricPayload = serde_json::from_str(
            r#"{"metric": "x", "value": 3, "tags": "a=b", "metric_type": "counter"}"#,
        )
        .unwrap();

        insta::assert_debug_snapshot!(payload.into_request(MetricKind::Gauge), @r#"
        MetricRequest {
            metric: "x",
            value: 3,
            tags: "a=b",
            sample_rate: 0.0,
            metric_type: Some(
                Gauge,
            ),
        }
        "#);
    }
}
