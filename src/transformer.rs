use log::trace;

use crate::error::Result;
use crate::metric::Metric;
use crate::sink::{MetricSink, SinkWrite};
use crate::tags::merge_tags;

/// Outcome of exporting one snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Metrics in the snapshot
    pub metrics: usize,
    /// Sink calls issued
    pub writes: usize,
}

/// Maps metric snapshots onto statsd gauge, count and distribution calls.
///
/// Holds only the static tags; nothing is carried between passes.
#[derive(Debug, Clone, Default)]
pub struct StatsdTransformer {
    static_tags: Vec<String>,
}

impl StatsdTransformer {
    /// Create a transformer; `static_tags` must already be validated
    pub fn new(static_tags: Vec<String>) -> Self {
        Self { static_tags }
    }

    pub fn static_tags(&self) -> &[String] {
        &self.static_tags
    }

    /// Sink calls for a snapshot, in metric order and bucket order
    pub fn transform(&self, metrics: &[Metric]) -> Vec<SinkWrite> {
        let mut writes = Vec::with_capacity(metrics.len());

        for metric in metrics {
            let tags = merge_tags(metric.labels(), &self.static_tags);

            match metric {
                Metric::Gauge { name, value, .. } => writes.push(SinkWrite::Gauge {
                    name: name.clone(),
                    value: *value,
                    tags,
                }),
                Metric::Counter { name, value, .. } => writes.push(SinkWrite::Count {
                    name: name.clone(),
                    value: *value,
                    tags,
                }),
                Metric::Histogram { name, buckets, .. } => {
                    writes.extend(buckets.iter().map(|bucket| SinkWrite::Distribution {
                        name: name.clone(),
                        value: bucket.upper_bound,
                        count: bucket.cumulative_count,
                        tags: tags.clone(),
                    }));
                }
            }
        }

        writes
    }

    /// Transform a snapshot and issue every write, stopping at the first sink error
    pub fn export<S: MetricSink + ?Sized>(&self, metrics: &[Metric], sink: &S) -> Result<PassReport> {
        let writes = self.transform(metrics);

        for write in &writes {
            trace!("Writing {:?} to {}", write, sink.name());
            write.apply(sink)?;
        }

        Ok(PassReport {
            metrics: metrics.len(),
            writes: writes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Bucket;
    use crate::sink::RecordingSink;
    use crate::tags::parse_static_tags;

    #[test]
    fn test_gauge_with_static_tags() {
        let transformer =
            StatsdTransformer::new(parse_static_tags("env:prod  bad_token  region:us"));
        let sink = RecordingSink::default();

        transformer
            .export(&[Metric::gauge("jvm.mem", 512.0)], &sink)
            .unwrap();

        assert_eq!(
            sink.writes().unwrap(),
            vec![SinkWrite::Gauge {
                name: "jvm.mem".to_string(),
                value: 512.0,
                tags: vec!["env:prod".to_string(), "region:us".to_string()],
            }]
        );
    }

    #[test]
    fn test_histogram_one_distribution_per_bucket() {
        let transformer = StatsdTransformer::new(parse_static_tags(""));
        let histogram = Metric::histogram(
            "latency",
            vec![Bucket::new(10.0, 5), Bucket::new(50.0, 12)],
        );

        let writes = transformer.transform(&[histogram]);
        assert_eq!(
            writes,
            vec![
                SinkWrite::Distribution {
                    name: "latency".to_string(),
                    value: 10.0,
                    count: 5,
                    tags: vec![],
                },
                SinkWrite::Distribution {
                    name: "latency".to_string(),
                    value: 50.0,
                    count: 12,
                    tags: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_empty_histogram_writes_nothing() {
        let transformer = StatsdTransformer::default();
        assert!(transformer.transform(&[Metric::histogram("idle", vec![])]).is_empty());
    }

    #[test]
    fn test_counter_labels_precede_static_tags() {
        let transformer = StatsdTransformer::new(vec!["env:prod".to_string()]);
        let counter = Metric::counter("chunks.loaded", 7).with_label("world", "nether");

        let writes = transformer.transform(&[counter]);
        assert_eq!(
            writes,
            vec![SinkWrite::Count {
                name: "chunks.loaded".to_string(),
                value: 7,
                tags: vec!["world:nether".to_string(), "env:prod".to_string()],
            }]
        );
    }

    #[test]
    fn test_order_is_preserved_across_kinds() {
        let transformer = StatsdTransformer::default();
        let metrics = vec![
            Metric::counter("a", 1),
            Metric::histogram("b", vec![Bucket::new(1.0, 1), Bucket::new(2.0, 3), Bucket::new(f64::INFINITY, 4)]),
            Metric::gauge("c", 2.5),
        ];

        let names: Vec<_> = transformer
            .transform(&metrics)
            .iter()
            .map(|w| w.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "b", "b", "c"]);
    }

    #[test]
    fn test_export_reports_counts() {
        let transformer = StatsdTransformer::default();
        let sink = RecordingSink::default();
        let metrics = vec![
            Metric::gauge("a", 1.0),
            Metric::histogram("b", vec![Bucket::new(1.0, 1), Bucket::new(2.0, 3)]),
        ];

        let report = transformer.export(&metrics, &sink).unwrap();
        assert_eq!(report, PassReport { metrics: 2, writes: 3 });
    }

    #[test]
    fn test_export_stops_at_sink_error() {
        let transformer = StatsdTransformer::default();
        let sink = RecordingSink::default();
        sink.fail_next(1);

        let result = transformer.export(&[Metric::gauge("a", 1.0), Metric::gauge("b", 1.0)], &sink);
        assert!(result.is_err());
        assert!(sink.writes().unwrap().is_empty());
    }
}
