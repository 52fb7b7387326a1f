// Export this process's own metrics to a DogStatsD collector

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use dogstatsd_exporter::config::{ConfigBuilder, ExportConfig};
use dogstatsd_exporter::error::ExportError;
use dogstatsd_exporter::exporter::DogStatsdExporter;
use dogstatsd_exporter::metric::{Bucket, Metric};
use dogstatsd_exporter::sink::MetricSink;
use dogstatsd_exporter::source::MetricSource;
use dogstatsd_exporter::util::logging;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "dogstatsd-exporter", version, about = "Export process metrics to DogStatsD")]
struct Args {
    /// TOML configuration file; COLLECTOR_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interval between collection passes in milliseconds
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Log samples instead of sending them
    #[arg(long)]
    dry_run: bool,
}

/// Upper bounds of the pass gap histogram, in milliseconds
const GAP_BOUNDS_MS: [f64; 4] = [100.0, 500.0, 1000.0, 5000.0];

/// Metrics about this exporter process
struct ProcessSource {
    started: Instant,
    hostname: String,
    /// Start of the previous pass and cumulative gap counts per bound
    gaps: Mutex<(Option<Instant>, [u64; GAP_BOUNDS_MS.len()])>,
}

impl ProcessSource {
    fn new() -> Self {
        let hostname = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            started: Instant::now(),
            hostname,
            gaps: Mutex::new((None, [0; GAP_BOUNDS_MS.len()])),
        }
    }

    fn record_gap(&self) -> dogstatsd_exporter::error::Result<Vec<Bucket>> {
        let mut gaps = self
            .gaps
            .lock()
            .map_err(|_| ExportError::Collection("Lock poisoned".to_string()))?;

        let now = Instant::now();
        if let Some(previous) = gaps.0.replace(now) {
            let gap_ms = now.duration_since(previous).as_secs_f64() * 1000.0;
            for (bound, count) in GAP_BOUNDS_MS.iter().zip(gaps.1.iter_mut()) {
                if gap_ms <= *bound {
                    *count += 1;
                }
            }
        }

        Ok(GAP_BOUNDS_MS
            .iter()
            .zip(gaps.1.iter())
            .map(|(bound, count)| Bucket::new(*bound, *count))
            .collect())
    }
}

#[async_trait]
impl MetricSource for ProcessSource {
    async fn collect(&self) -> dogstatsd_exporter::error::Result<Vec<Metric>> {
        let buckets = self.record_gap()?;
        let uptime = self.started.elapsed().as_secs_f64();

        Ok(vec![
            Metric::gauge("exporter.uptime_seconds", uptime).with_label("host", &self.hostname),
            Metric::counter("exporter.passes", 1).with_label("host", &self.hostname),
            Metric::histogram("exporter.pass_gap_ms", buckets).with_label("host", &self.hostname),
        ])
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Logs every sample instead of sending it
struct LogSink;

impl MetricSink for LogSink {
    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> dogstatsd_exporter::error::Result<()> {
        info!("gauge {} = {} {:?}", name, value, tags);
        Ok(())
    }

    fn count(&self, name: &str, value: i64, tags: &[String]) -> dogstatsd_exporter::error::Result<()> {
        info!("count {} += {} {:?}", name, value, tags);
        Ok(())
    }

    fn distribution(
        &self,
        name: &str,
        value: f64,
        count: u64,
        tags: &[String],
    ) -> dogstatsd_exporter::error::Result<()> {
        info!("distribution {} <= {} x{} {:?}", name, value, count, tags);
        Ok(())
    }

    fn close(&self) -> dogstatsd_exporter::error::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

fn load_config(args: &Args) -> Result<ExportConfig> {
    let mut builder = ConfigBuilder::new();
    if let Some(path) = &args.config {
        builder = builder.add_file(path);
    }

    let mut config = builder
        .add_env()
        .build()
        .context("Failed to load exporter configuration")?;

    if let Some(interval_ms) = args.interval_ms {
        config.interval_millis = interval_ms;
    }

    Ok(config)
}

async fn run_until_ctrl_c<K: MetricSink>(exporter: DogStatsdExporter<ProcessSource, K>) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    exporter.close().await?;

    let stats = exporter.stats();
    info!(
        "Ran {} passes, {} failed",
        stats.passes, stats.failures
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet
            eprintln!("{:#}", e);
            std::process::exit(2);
        }
    };

    logging::init(&config.log_level);
    info!(
        "dogstatsd-exporter {} exporting to {} with tags {:?}",
        dogstatsd_exporter::VERSION,
        config.collector_addr(),
        config.static_tags
    );

    if args.dry_run {
        let exporter =
            DogStatsdExporter::with_sink(config, ProcessSource::new(), LogSink).await?;
        run_until_ctrl_c(exporter).await
    } else {
        match DogStatsdExporter::initialize(config, ProcessSource::new()).await {
            Ok(exporter) => run_until_ctrl_c(exporter).await,
            Err(e) => {
                error!("Failed to initialize exporter: {}", e);
                Err(e.into())
            }
        }
    }
}
