use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{MetricSink, SinkWrite};
use crate::error::{ExportError, Result};

/// An in-memory sink that records every write in order
pub struct RecordingSink {
    writes: Mutex<Vec<SinkWrite>>,
    fail_next: AtomicUsize,
    closed: AtomicBool,
    name: String,
}

impl RecordingSink {
    /// Create a new recording sink
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            name: name.into(),
        }
    }

    /// Make the next `n` writes fail without being recorded
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Snapshot of all recorded writes
    pub fn writes(&self) -> Result<Vec<SinkWrite>> {
        let writes = self
            .writes
            .lock()
            .map_err(|_| ExportError::Sink("Lock poisoned".to_string()))?;
        Ok(writes.clone())
    }

    /// Remove and return all recorded writes
    pub fn take(&self) -> Result<Vec<SinkWrite>> {
        let mut writes = self
            .writes
            .lock()
            .map_err(|_| ExportError::Sink("Lock poisoned".to_string()))?;
        Ok(std::mem::take(&mut *writes))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, write: SinkWrite) -> Result<()> {
        if self.is_closed() {
            return Err(ExportError::Sink(format!(
                "write to closed sink '{}': {}",
                self.name,
                write.name()
            )));
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ExportError::Sink(format!(
                "injected failure writing {}",
                write.name()
            )));
        }

        let mut writes = self
            .writes
            .lock()
            .map_err(|_| ExportError::Sink("Lock poisoned".to_string()))?;
        writes.push(write);
        Ok(())
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new("recording")
    }
}

impl MetricSink for RecordingSink {
    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<()> {
        self.record(SinkWrite::Gauge {
            name: name.to_string(),
            value,
            tags: tags.to_vec(),
        })
    }

    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<()> {
        self.record(SinkWrite::Count {
            name: name.to_string(),
            value,
            tags: tags.to_vec(),
        })
    }

    fn distribution(&self, name: &str, value: f64, count: u64, tags: &[String]) -> Result<()> {
        self.record(SinkWrite::Distribution {
            name: name.to_string(),
            value,
            count,
            tags: tags.to_vec(),
        })
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
