//! Subscriber installation driven by [`LoggingConfig`].

use crate::errors::PlotflowError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 0 logs warnings only, 1 adds info, 2 or more adds debug.
    #[serde(default)]
    pub verbosity: u8,
    /// Suppresses console output. A log file, if set, is still written.
    #[serde(default)]
    pub quiet: bool,
    /// Console output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Optional file receiving info-level (debug at verbosity 2) logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            quiet: false,
            format: LogFormat::Text,
            log_file: None,
        }
    }
}

impl LoggingConfig {
    /// Sets the verbosity.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Sets quiet mode.
    #[must_use]
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Sets the console format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the log file.
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Level directive for the console.
    #[must_use]
    pub fn console_level(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    /// Level directive for the log file.
    #[must_use]
    pub fn file_level(&self) -> &'static str {
        if self.verbosity >= 2 {
            "debug"
        } else {
            "info"
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber.
///
/// `RUST_LOG`, when set, overrides the levels derived from verbosity. Fails
/// if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), PlotflowError> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if !config.quiet {
        let filter = build_filter(config.console_level())?;
        let layer: BoxedLayer = match config.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter)
                .boxed(),
            LogFormat::Text => fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(filter)
                .boxed(),
        };
        layers.push(layer);
    }

    if let Some(path) = &config.log_file {
        let file = open_log_file(path)?;
        let filter = build_filter(config.file_level())?;
        let layer: BoxedLayer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(filter)
            .boxed();
        layers.push(layer);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| PlotflowError::Logging(e.to_string()))
}

fn build_filter(level: &str) -> Result<EnvFilter, PlotflowError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| PlotflowError::Logging(format!("invalid level '{level}': {e}")))
}

fn open_log_file(path: &Path) -> Result<std::fs::File, PlotflowError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            PlotflowError::Logging(format!("failed to create log directory {}: {e}", parent.display()))
        })?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PlotflowError::Logging(format!("failed to open log file {}: {e}", path.display())))
}
