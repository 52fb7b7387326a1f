// src/config.rs
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ExportError, Result};
use crate::tags::{is_valid_tag, parse_static_tags};

/// Prefix of the environment variables read by [`ConfigSource::Environment`]
pub const ENV_PREFIX: &str = "COLLECTOR";

/// Default statsd port
pub const DEFAULT_PORT: u16 = 8125;

/// Default metric name prefix
pub const DEFAULT_PREFIX: &str = "statsd";

/// Default delay between collection passes
pub const DEFAULT_INTERVAL_MILLIS: u64 = 1000;

/// Logging level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// Settings for one export session, fixed once the exporter starts
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// Hostname or address of the statsd collector
    pub collector_host: String,
    /// UDP port of the statsd collector
    pub collector_port: u16,
    /// Prefix prepended to every metric name by the sink
    pub prefix: String,
    /// Validated `key:value` tags attached to every sample
    pub static_tags: Vec<String>,
    /// Target delay between the starts of two collection passes
    pub interval_millis: u64,
    /// Logging level for the binary
    pub log_level: LogLevel,
}

impl ExportConfig {
    /// Create a configuration with defaults for everything but the host
    pub fn new(collector_host: impl Into<String>) -> Self {
        Self {
            collector_host: collector_host.into(),
            collector_port: DEFAULT_PORT,
            prefix: DEFAULT_PREFIX.to_string(),
            static_tags: Vec::new(),
            interval_millis: DEFAULT_INTERVAL_MILLIS,
            log_level: LogLevel::default(),
        }
    }

    /// Replace the static tags with the valid tokens of a raw tag string
    pub fn with_raw_tags(mut self, raw: &str) -> Self {
        self.static_tags = parse_static_tags(raw);
        self
    }

    pub fn with_interval_millis(mut self, interval_millis: u64) -> Self {
        self.interval_millis = interval_millis;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.collector_port = port;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Load from the process environment only
    pub fn from_env() -> Result<Self> {
        ConfigBuilder::new().add_env().build()
    }

    /// Load from a TOML file, with environment variables taking precedence
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ExportError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        ConfigBuilder::new().add_file(path).add_env().build()
    }

    /// Interval between the starts of two passes
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }

    /// `host:port` of the collector
    pub fn collector_addr(&self) -> String {
        format!("{}:{}", self.collector_host, self.collector_port)
    }
}

/// Tags may be written as one whitespace-separated string or as a list.
///
/// Environment values are type-inferred, so `COLLECTOR_TAGS=42` arrives as
/// a number rather than a string. Scalars are read back as raw text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTags {
    Raw(String),
    List(Vec<String>),
    Bool(bool),
    Integer(i64),
    Float(f64),
}

impl RawTags {
    fn into_tags(self) -> Vec<String> {
        match self {
            RawTags::Raw(raw) => parse_static_tags(&raw),
            RawTags::Bool(raw) => parse_static_tags(&raw.to_string()),
            RawTags::Integer(raw) => parse_static_tags(&raw.to_string()),
            RawTags::Float(raw) => parse_static_tags(&raw.to_string()),
            RawTags::List(list) => list
                .into_iter()
                .filter(|tag| {
                    let valid = is_valid_tag(tag);
                    if !valid {
                        warn!("Ignoring malformed tag '{}'", tag);
                    }
                    valid
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    host: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_prefix")]
    prefix: String,
    #[serde(default)]
    tags: Option<RawTags>,
    #[serde(default = "default_interval")]
    interval_ms: u64,
    #[serde(default)]
    log_level: LogLevel,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_MILLIS
}

impl TryFrom<RawConfig> for ExportConfig {
    type Error = ExportError;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let collector_host = match raw.host {
            Some(host) if !host.trim().is_empty() => host.trim().to_string(),
            _ => {
                return Err(ExportError::Config(format!(
                    "{}_HOST is not set; no collector to export to",
                    ENV_PREFIX
                )));
            }
        };

        Ok(ExportConfig {
            collector_host,
            collector_port: raw.port,
            prefix: raw.prefix,
            static_tags: raw.tags.map(RawTags::into_tags).unwrap_or_default(),
            interval_millis: raw.interval_ms,
            log_level: raw.log_level,
        })
    }
}

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// TOML file path, skipped with a warning when missing
    File(PathBuf),
    /// TOML string
    Toml(String),
    /// `COLLECTOR_*` variables of the process environment
    Environment,
    /// `COLLECTOR_*` variables from an explicit map instead of the process
    EnvironmentMap(HashMap<String, String>),
}

/// Layered configuration builder; later sources override earlier ones
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    sources: Vec<ConfigSource>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a TOML file source
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources
            .push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Add TOML string
    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Toml(toml.into()));
        self
    }

    /// Add the process environment
    pub fn add_env(mut self) -> Self {
        self.sources.push(ConfigSource::Environment);
        self
    }

    /// Add environment variables from a map
    pub fn add_env_map(mut self, vars: HashMap<String, String>) -> Self {
        self.sources.push(ConfigSource::EnvironmentMap(vars));
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ExportConfig> {
        let mut builder = config::Config::builder();

        for source in self.sources {
            match source {
                ConfigSource::File(path) => {
                    if !path.exists() {
                        warn!("Configuration file not found: {}", path.display());
                        continue;
                    }

                    debug!("Loading TOML configuration from file: {}", path.display());
                    builder = builder.add_source(
                        config::File::from(path.as_path()).format(config::FileFormat::Toml),
                    );
                }
                ConfigSource::Toml(toml_str) => {
                    debug!("Loading configuration from TOML string");
                    builder = builder
                        .add_source(config::File::from_str(&toml_str, config::FileFormat::Toml));
                }
                ConfigSource::Environment => {
                    debug!("Loading configuration from environment with prefix: {}", ENV_PREFIX);
                    builder = builder.add_source(environment());
                }
                ConfigSource::EnvironmentMap(vars) => {
                    debug!("Loading configuration from {} injected variables", vars.len());
                    builder = builder.add_source(environment().source(Some(vars.into_iter().collect())));
                }
            }
        }

        let raw: RawConfig = builder
            .build()
            .map_err(|e| ExportError::Config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| {
                ExportError::Config(format!("Failed to deserialize configuration: {}", e))
            })?;

        let config = ExportConfig::try_from(raw)?;
        debug!("Configuration loaded successfully: {:?}", config);

        Ok(config)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX).try_parsing(true)
}
