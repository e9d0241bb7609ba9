use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProxyCounters;

/// The StatsD operation a metric is forwarded with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// A counter, sent as `|c`.
    Count,
    /// A gauge, sent as `|g`.
    Gauge,
    /// A duration in milliseconds, sent as `|ms`.
    Timing,
    /// A set member, sent as `|s`.
    Set,
}

impl MetricKind {
    /// Returns the name used in routes and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Gauge => "gauge",
            Self::Timing => "timing",
            Self::Set => "set",
        }
    }

    /// Returns the counter incremented after a metric of this kind was forwarded.
    pub(crate) fn added_counter(&self) -> ProxyCounters {
        match self {
            Self::Count => ProxyCounters::CountersAdded,
            Self::Gauge => ProxyCounters::GaugesAdded,
            Self::Timing => ProxyCounters::TimingAdded,
            Self::Set => ProxyCounters::SetAdded,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when parsing an unknown [`MetricKind`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown metric kind {0:?}")]
pub struct ParseMetricKindError(String);

impl FromStr for MetricKind {
    type Err = ParseMetricKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Self::Count),
            "gauge" => Ok(Self::Gauge),
            "timing" => Ok(Self::Timing),
            "set" => Ok(Self::Set),
            other => Err(ParseMetricKindError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!("count".parse(), Ok(MetricKind::Count));
        assert_eq!("timing".parse(), Ok(MetricKind::Timing));
        assert_eq!(
            "histogram".parse::<MetricKind>(),
            Err(ParseMetricKindError("histogram".to_owned()))
        );
        assert!("Count".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_kind_serde() {
        let kind: MetricKind = serde_json::from_str(r#""gauge""#).unwrap();
        assert_eq!(kind, MetricKind::Gauge);
        assert_eq!(serde_json::to_string(&MetricKind::Set).unwrap(), r#""set""#);
        assert!(serde_json::from_str::<MetricKind>(r#""meter""#).is_err());
    }
}
