//! Destinations for exported samples
mod memory;
mod statsd;

pub use memory::RecordingSink;
pub use statsd::StatsdSink;

use crate::error::Result;

/// A statsd-style metric client.
///
/// Writes are fire-and-forget: an `Ok` only means the sample was handed to
/// the client, not that the collector received it.
pub trait MetricSink: Send + Sync + 'static {
    /// Record the current value of a gauge
    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<()>;

    /// Add `value` to a counter
    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<()>;

    /// Record a distribution sample at `value` carrying an observation count
    fn distribution(&self, name: &str, value: f64, count: u64, tags: &[String]) -> Result<()>;

    /// Flush pending samples and release the client.
    ///
    /// Must not run concurrently with a collection pass; writes issued
    /// afterwards are rejected or dropped.
    fn close(&self) -> Result<()>;

    /// Get the sink name
    fn name(&self) -> &str;
}

/// One call against a [`MetricSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum SinkWrite {
    Gauge {
        name: String,
        value: f64,
        tags: Vec<String>,
    },
    Count {
        name: String,
        value: i64,
        tags: Vec<String>,
    },
    Distribution {
        name: String,
        value: f64,
        count: u64,
        tags: Vec<String>,
    },
}

impl SinkWrite {
    /// Issue this write against a sink
    pub fn apply<S: MetricSink + ?Sized>(&self, sink: &S) -> Result<()> {
        match self {
            SinkWrite::Gauge { name, value, tags } => sink.gauge(name, *value, tags),
            SinkWrite::Count { name, value, tags } => sink.count(name, *value, tags),
            SinkWrite::Distribution {
                name,
                value,
                count,
                tags,
            } => sink.distribution(name, *value, *count, tags),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SinkWrite::Gauge { name, .. }
            | SinkWrite::Count { name, .. }
            | SinkWrite::Distribution { name, .. } => name,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            SinkWrite::Gauge { tags, .. }
            | SinkWrite::Count { tags, .. }
            | SinkWrite::Distribution { tags, .. } => tags,
        }
    }
}
