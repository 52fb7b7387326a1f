// src/error.rs
use std::io;
use thiserror::Error;

/// Result type used throughout the exporter
pub type Result<T> = std::result::Result<T, ExportError>;

/// Custom Error type for the exporter
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Collection error: {0}")]
    Collection(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Exporter is already running")]
    AlreadyRunning,

    #[error("Exporter has been stopped")]
    Stopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<cadence::MetricError> for ExportError {
    fn from(err: cadence::MetricError) -> Self {
        ExportError::Sink(err.to_string())
    }
}
