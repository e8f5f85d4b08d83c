//! Logging setup for the `jobboss` binary.
//!
//! - Console output (development)
//! - JSON structured logging (production)
//! - Optional append-only log file shared by the boss and its employees

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LoggingSettings;

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output.
    Console,
    /// JSON structured logging.
    Json,
}

impl TracingFormat {
    fn parse(format: &str) -> Self {
        match format {
            "json" => TracingFormat::Json,
            _ => TracingFormat::Console,
        }
    }
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub log_level: String,
    /// Output format (console or JSON).
    pub format: TracingFormat,
    /// Log file. `None` writes to stderr.
    pub path: Option<PathBuf>,
}

impl TracingConfig {
    /// Build from settings; `-v` flags win over the configured level.
    pub fn from_settings(logging: &LoggingSettings, verbose: u8) -> Self {
        let log_level = match verbose {
            0 => logging.level.clone(),
            1 => "info".to_string(),
            2 => "debug".to_string(),
            _ => "trace".to_string(),
        };

        Self {
            log_level,
            format: TracingFormat::parse(&logging.format),
            path: logging.path.clone(),
        }
    }

    /// `RUST_LOG` if set, otherwise the configured level.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

/// Install the global subscriber.
pub fn init_tracing(config: &TracingConfig) -> anyhow::Result<()> {
    let (writer, ansi) = match &config.path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let fmt_layer = match config.format {
        TracingFormat::Console => fmt::layer()
            .with_target(false)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        TracingFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}
