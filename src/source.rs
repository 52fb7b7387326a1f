use crate::error::Result;
use crate::metric::Metric;

/// The host side of an export: produces a fresh snapshot on every pass
#[async_trait::async_trait]
pub trait MetricSource: Send + Sync + 'static {
    /// Collect the current metrics, in the order they should be exported
    async fn collect(&self) -> Result<Vec<Metric>>;

    /// Get the source name
    fn name(&self) -> &str;
}

/// A source that calls a function on every pass
pub struct FunctionSource<F>
where
    F: Fn() -> Result<Vec<Metric>> + Send + Sync + 'static,
{
    collect_fn: F,
    name: String,
}

impl<F> FunctionSource<F>
where
    F: Fn() -> Result<Vec<Metric>> + Send + Sync + 'static,
{
    /// Create a new function source
    pub fn new(name: impl Into<String>, collect_fn: F) -> Self {
        Self {
            collect_fn,
            name: name.into(),
        }
    }
}

#[async_trait::async_trait]
impl<F> MetricSource for FunctionSource<F>
where
    F: Fn() -> Result<Vec<Metric>> + Send + Sync + 'static,
{
    async fn collect(&self) -> Result<Vec<Metric>> {
        (self.collect_fn)()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
