//! Periodic export of host metric snapshots to a DogStatsD collector

pub mod config;
pub mod error;
pub mod exporter;
pub mod metric;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod tags;
pub mod transformer;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::config::{ConfigBuilder, ExportConfig};
    pub use crate::error::{ExportError, Result};
    pub use crate::exporter::DogStatsdExporter;
    pub use crate::metric::{Bucket, Labels, Metric, MetricKind};
    pub use crate::scheduler::{ExportScheduler, SchedulerStats};
    pub use crate::sink::{MetricSink, RecordingSink, SinkWrite, StatsdSink};
    pub use crate::source::{FunctionSource, MetricSource};
    pub use crate::transformer::{PassReport, StatsdTransformer};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
