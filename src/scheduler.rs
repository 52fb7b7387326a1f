//! Fixed-cadence driver for collection passes
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ExportError, Result};
use crate::sink::MetricSink;
use crate::source::MetricSource;
use crate::transformer::{PassReport, StatsdTransformer};

/// Message logged when a pass fails
pub const PASS_FAILED_MESSAGE: &str = "An error occurred whilst writing samples to DogStatsD";

/// Time left in the interval after a pass; zero when the pass overran it
pub fn sleep_for(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Counters describing the passes run so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Passes started, successful or not
    pub passes: u64,
    /// Passes that ended in an error or a panic
    pub failures: u64,
    /// Duration of the most recent pass
    pub last_pass: Option<Duration>,
    /// Log line of the most recent failed pass
    pub last_error: Option<String>,
}

/// Lifecycle of a scheduler; `Stopped` is terminal
enum SchedulerState {
    Idle,
    Running {
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Everything one pass needs, shared with the background task
struct PassRunner<S, K> {
    source: S,
    transformer: StatsdTransformer,
    sink: Arc<K>,
    stats: Mutex<SchedulerStats>,
}

impl<S: MetricSource, K: MetricSink> PassRunner<S, K> {
    async fn run_pass(&self) -> Result<PassReport> {
        let metrics = self.source.collect().await?;
        self.transformer.export(&metrics, self.sink.as_ref())
    }

    fn record(&self, elapsed: Duration, error: Option<String>) {
        let Ok(mut stats) = self.stats.lock() else {
            warn!("Scheduler statistics lock poisoned");
            return;
        };

        stats.passes += 1;
        stats.last_pass = Some(elapsed);
        if error.is_some() {
            stats.failures += 1;
            stats.last_error = error;
        }
    }
}

/// Runs collect-transform-export passes on a background task.
///
/// Passes never overlap: the next one starts `interval` after the previous
/// one started, or immediately when the previous pass took longer than that.
/// A failing pass is logged and retried on the next tick.
pub struct ExportScheduler<S, K> {
    runner: Arc<PassRunner<S, K>>,
    interval: Duration,
    state: AsyncMutex<SchedulerState>,
}

impl<S: MetricSource, K: MetricSink> ExportScheduler<S, K> {
    /// Create a new, idle scheduler
    pub fn new(
        source: S,
        transformer: StatsdTransformer,
        sink: Arc<K>,
        interval: Duration,
    ) -> Self {
        Self {
            runner: Arc::new(PassRunner {
                source,
                transformer,
                sink,
                stats: Mutex::new(SchedulerStats::default()),
            }),
            interval,
            state: AsyncMutex::new(SchedulerState::Idle),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the export loop.
    ///
    /// Fails with [`ExportError::AlreadyRunning`] while a loop is active and
    /// with [`ExportError::Stopped`] once [`stop`](Self::stop) was called.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        match *state {
            SchedulerState::Idle => {}
            SchedulerState::Running { .. } => return Err(ExportError::AlreadyRunning),
            SchedulerState::Stopped => return Err(ExportError::Stopped),
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let runner = Arc::clone(&self.runner);
        let interval = self.interval;

        info!(
            "Starting export of '{}' to {} every {:?}",
            runner.source.name(),
            runner.sink.name(),
            interval
        );

        let handle = tokio::spawn(run_loop(runner, interval, shutdown_rx));
        *state = SchedulerState::Running { shutdown, handle };

        Ok(())
    }

    /// Stop the export loop and wait for an in-flight pass to finish.
    ///
    /// Interrupts the inter-tick sleep. Calling it again, or before
    /// [`start`](Self::start), is a no-op apart from marking the scheduler
    /// stopped.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;

        if let SchedulerState::Running { shutdown, handle } =
            std::mem::replace(&mut *state, SchedulerState::Stopped)
        {
            // The receiver only disappears if the task already ended
            let _ = shutdown.send(true);

            if let Err(e) = handle.await {
                error!("Export loop ended abnormally: {}", e);
            }

            info!("Stopped export of '{}'", self.runner.source.name());
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, SchedulerState::Running { .. })
    }

    /// Snapshot of the pass counters
    pub fn stats(&self) -> SchedulerStats {
        self.runner
            .stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

async fn run_loop<S: MetricSource, K: MetricSink>(
    runner: Arc<PassRunner<S, K>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let started = Instant::now();

        // A separate task keeps a panicking source from ending the loop
        let pass = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run_pass().await }
        });

        let outcome = match pass.await {
            Ok(Ok(report)) => {
                debug!(
                    "Exported {} metrics as {} samples",
                    report.metrics, report.writes
                );
                None
            }
            Ok(Err(e)) => Some(format!("{}: {}", PASS_FAILED_MESSAGE, e)),
            Err(e) => Some(format!("{}: {}", PASS_FAILED_MESSAGE, e)),
        };
        if let Some(message) = &outcome {
            error!("{}", message);
        }

        let elapsed = started.elapsed();
        runner.record(elapsed, outcome);

        let pause = sleep_for(interval, elapsed);
        if pause.is_zero() {
            debug!("Pass took {:?}, longer than the {:?} interval", elapsed, interval);
        }

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
