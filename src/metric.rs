//! Metric snapshots produced by the host collector
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Label set attached to a metric, unordered
pub type Labels = HashMap<String, String>;

/// One boundary of a cumulative histogram snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Inclusive upper bound of the bucket
    pub upper_bound: f64,
    /// Number of observations less than or equal to `upper_bound`
    pub cumulative_count: u64,
}

impl Bucket {
    pub fn new(upper_bound: f64, cumulative_count: u64) -> Self {
        Self {
            upper_bound,
            cumulative_count,
        }
    }
}

/// A single metric as reported by the host for one collection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Metric {
    Gauge {
        name: String,
        value: f64,
        #[serde(default)]
        labels: Labels,
    },
    Counter {
        name: String,
        value: i64,
        #[serde(default)]
        labels: Labels,
    },
    Histogram {
        name: String,
        buckets: Vec<Bucket>,
        #[serde(default)]
        labels: Labels,
    },
}

/// Discriminant of a [`Metric`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => f.write_str("gauge"),
            MetricKind::Counter => f.write_str("counter"),
            MetricKind::Histogram => f.write_str("histogram"),
        }
    }
}

impl Metric {
    /// Create a gauge without labels
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Metric::Gauge {
            name: name.into(),
            value,
            labels: Labels::new(),
        }
    }

    /// Create a counter without labels
    pub fn counter(name: impl Into<String>, value: i64) -> Self {
        Metric::Counter {
            name: name.into(),
            value,
            labels: Labels::new(),
        }
    }

    /// Create a histogram without labels
    pub fn histogram(name: impl Into<String>, buckets: Vec<Bucket>) -> Self {
        Metric::Histogram {
            name: name.into(),
            buckets,
            labels: Labels::new(),
        }
    }

    /// Attach a label, replacing any previous value for the key
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels_mut().insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Metric::Gauge { name, .. }
            | Metric::Counter { name, .. }
            | Metric::Histogram { name, .. } => name,
        }
    }

    pub fn labels(&self) -> &Labels {
        match self {
            Metric::Gauge { labels, .. }
            | Metric::Counter { labels, .. }
            | Metric::Histogram { labels, .. } => labels,
        }
    }

    fn labels_mut(&mut self) -> &mut Labels {
        match self {
            Metric::Gauge { labels, .. }
            | Metric::Counter { labels, .. }
            | Metric::Histogram { labels, .. } => labels,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Gauge { .. } => MetricKind::Gauge,
            Metric::Counter { .. } => MetricKind::Counter,
            Metric::Histogram { .. } => MetricKind::Histogram,
        }
    }
}
