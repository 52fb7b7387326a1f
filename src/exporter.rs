use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::scheduler::{ExportScheduler, SchedulerStats};
use crate::sink::{MetricSink, StatsdSink};
use crate::source::MetricSource;
use crate::transformer::StatsdTransformer;

/// Owns one export session: the sink client and the scheduler feeding it.
///
/// The sink is created before the loop starts and is only closed by
/// [`close`](Self::close), after the loop has finished its last pass.
pub struct DogStatsdExporter<S, K = StatsdSink> {
    config: Arc<ExportConfig>,
    scheduler: ExportScheduler<S, K>,
    sink: Arc<K>,
    closed: AtomicBool,
}

impl<S: MetricSource> DogStatsdExporter<S, StatsdSink> {
    /// Connect to the configured collector and start exporting
    pub async fn initialize(config: ExportConfig, source: S) -> Result<Self> {
        let sink = StatsdSink::from_config(&config)?;
        Self::with_sink(config, source, sink).await
    }

    /// Read `COLLECTOR_*` from the environment, then [`initialize`](Self::initialize)
    pub async fn from_env(source: S) -> Result<Self> {
        let config = ExportConfig::from_env()?;
        Self::initialize(config, source).await
    }
}

impl<S: MetricSource, K: MetricSink> DogStatsdExporter<S, K> {
    /// Start exporting to an already constructed sink
    pub async fn with_sink(config: ExportConfig, source: S, sink: K) -> Result<Self> {
        let config = Arc::new(config);
        let sink = Arc::new(sink);
        let transformer = StatsdTransformer::new(config.static_tags.clone());

        let scheduler =
            ExportScheduler::new(source, transformer, Arc::clone(&sink), config.interval());
        scheduler.start().await?;

        Ok(Self {
            config,
            scheduler,
            sink,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<K> {
        &self.sink
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.is_running().await
    }

    /// Stop exporting, then flush and release the sink. Idempotent.
    ///
    /// Closing the sink may block while queued samples drain, so it runs on
    /// the blocking pool.
    pub async fn close(&self) -> Result<()> {
        self.scheduler.stop().await;

        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.close())
            .await
            .map_err(|e| ExportError::Sink(format!("Sink close task failed: {}", e)))??;
        info!("Closed exporter for {}", self.config.collector_addr());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Bucket, Metric};
    use crate::sink::{RecordingSink, SinkWrite};
    use crate::source::FunctionSource;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};
    use std::time::Duration;

    /// Remembers which thread closed it
    #[derive(Default)]
    struct ThreadTrackingSink {
        inner: RecordingSink,
        closed_on: Mutex<Option<ThreadId>>,
    }

    impl MetricSink for ThreadTrackingSink {
        fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<()> {
            self.inner.gauge(name, value, tags)
        }

        fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<()> {
            self.inner.count(name, value, tags)
        }

        fn distribution(&self, name: &str, value: f64, count: u64, tags: &[String]) -> Result<()> {
            self.inner.distribution(name, value, count, tags)
        }

        fn close(&self) -> Result<()> {
            *self.closed_on.lock().unwrap() = Some(thread::current().id());
            self.inner.close()
        }

        fn name(&self) -> &str {
            "thread-tracking"
        }
    }

    fn source() -> impl MetricSource {
        FunctionSource::new("host", || {
            Ok(vec![
                Metric::gauge("jvm.mem", 512.0),
                Metric::histogram("latency", vec![Bucket::new(10.0, 5)]),
            ])
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_exports_with_static_tags_until_closed() {
        let config = ExportConfig::new("localhost")
            .with_raw_tags("env:prod bad_token")
            .with_interval_millis(1000);

        let exporter = DogStatsdExporter::with_sink(config, source(), RecordingSink::default())
            .await
            .unwrap();
        assert!(exporter.is_running().await);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        exporter.close().await.unwrap();

        let writes = exporter.sink().writes().unwrap();
        assert_eq!(writes.len(), 4);
        assert_eq!(
            writes[0],
            SinkWrite::Gauge {
                name: "jvm.mem".to_string(),
                value: 512.0,
                tags: vec!["env:prod".to_string()],
            }
        );
        assert!(exporter.sink().is_closed());
        assert!(!exporter.is_running().await);
        assert_eq!(exporter.stats().passes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_twice() {
        let exporter = DogStatsdExporter::with_sink(
            ExportConfig::new("localhost"),
            source(),
            RecordingSink::default(),
        )
        .await
        .unwrap();

        exporter.close().await.unwrap();
        exporter.close().await.unwrap();
        assert!(exporter.sink().is_closed());
    }

    #[tokio::test]
    async fn test_sink_is_closed_off_the_runtime_thread() {
        let exporter = DogStatsdExporter::with_sink(
            ExportConfig::new("localhost"),
            source(),
            ThreadTrackingSink::default(),
        )
        .await
        .unwrap();

        exporter.close().await.unwrap();

        let closed_on = exporter.sink().closed_on.lock().unwrap().unwrap();
        assert_ne!(closed_on, thread::current().id());
        assert!(exporter.sink().inner.is_closed());
    }

    #[tokio::test]
    async fn test_no_write_after_close() {
        let exporter = DogStatsdExporter::with_sink(
            ExportConfig::new("localhost").with_interval_millis(0),
            source(),
            RecordingSink::default(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        exporter.close().await.unwrap();

        // A write racing the close would have been counted as a failed pass
        assert_eq!(exporter.stats().failures, 0);
    }

    #[tokio::test]
    async fn test_initialize_rejects_unresolvable_collector() {
        let result =
            DogStatsdExporter::initialize(ExportConfig::new("host.invalid."), source()).await;
        assert!(matches!(result, Err(ExportError::Sink(_))));
    }

    #[tokio::test]
    async fn test_initialize_against_local_collector() {
        let collector = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = collector.local_addr().unwrap().port();

        let exporter =
            DogStatsdExporter::initialize(ExportConfig::new("127.0.0.1").with_port(port), source())
                .await
                .unwrap();
        assert_eq!(exporter.config().collector_port, port);
        exporter.close().await.unwrap();
    }
}
