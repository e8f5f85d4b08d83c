//! Settings for the `jobboss` binary.
//!
//! Precedence (highest to lowest):
//! 1. Command-line flags
//! 2. `JOBBOSS_*` environment variables (a `.env` file is loaded first)
//! 3. YAML configuration file
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use jobboss_sched::BossConfig;
use serde::{Deserialize, Serialize};

/// Resolved settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the SQLite job database.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Boss poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of concurrently running employees
    #[serde(default = "default_employee_limit")]
    pub employee_limit: usize,

    /// Delete finished jobs older than this many seconds
    #[serde(default)]
    pub retention_secs: Option<u64>,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "console" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Append log lines to this file instead of stderr
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_database() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobboss")
        .join("jobs.db")
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_employee_limit() -> usize {
    4
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "console".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            path: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: default_database(),
            poll_interval_ms: default_poll_interval_ms(),
            employee_limit: default_employee_limit(),
            retention_secs: None,
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {e}", path.display())))?;

        serde_yaml_ng::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load settings: `.env`, then the file (if any), then environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let settings = settings.merge_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `JOBBOSS_*` variables that are set. Absent ones leave fields unchanged.
    fn merge_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("JOBBOSS_DATABASE") {
            self.database = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("JOBBOSS_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_env("JOBBOSS_POLL_INTERVAL_MS", &v)?;
        }
        if let Ok(v) = std::env::var("JOBBOSS_EMPLOYEE_LIMIT") {
            self.employee_limit = parse_env("JOBBOSS_EMPLOYEE_LIMIT", &v)?;
        }
        if let Ok(v) = std::env::var("JOBBOSS_RETENTION_SECS") {
            self.retention_secs = Some(parse_env("JOBBOSS_RETENTION_SECS", &v)?);
        }

        if let Ok(v) = std::env::var("JOBBOSS_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("JOBBOSS_LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Ok(v) = std::env::var("JOBBOSS_LOG_PATH") {
            self.logging.path = Some(PathBuf::from(v));
        }

        Ok(self)
    }

    /// Validate settings values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.employee_limit == 0 {
            return Err(ConfigError::ValidationError(
                "employee_limit must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {other}"
                )));
            }
        }

        match self.logging.format.as_str() {
            "console" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {other}"
                )));
            }
        }

        Ok(())
    }

    /// Scalars for the boss loop.
    pub fn boss_config(&self) -> BossConfig {
        let mut config = BossConfig::default()
            .with_employee_limit(self.employee_limit)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms));
        config.store_backoff_max = config.store_backoff_max.max(config.poll_interval);

        match self.retention_secs {
            Some(secs) => config.with_retention(Duration::from_secs(secs)),
            None => config,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::ParseError(format!("{key}: invalid value '{value}'")))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.poll_interval_ms, 500);
        assert_eq!(settings.employee_limit, 4);
        assert!(settings.retention_secs.is_none());
        assert_eq!(settings.logging.level, "warn");
        assert!(settings.database.ends_with("jobboss/jobs.db"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let settings = Settings {
            employee_limit: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_log_format() {
        let mut settings = Settings::default();
        settings.logging.format = "xml".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobboss.yaml");
        std::fs::write(
            &path,
            "database: /tmp/boss.db\nemployee_limit: 2\nlogging:\n  format: json\n",
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.database, PathBuf::from("/tmp/boss.db"));
        assert_eq!(settings.employee_limit, 2);
        assert_eq!(settings.poll_interval_ms, 500);
        assert_eq!(settings.logging.format, "json");
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn test_boss_config_from_settings() {
        let settings = Settings {
            poll_interval_ms: 100,
            employee_limit: 8,
            retention_secs: Some(3600),
            ..Settings::default()
        };

        let config = settings.boss_config();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.employee_limit, 8);
        assert_eq!(config.retention, Some(Duration::from_secs(3600)));
        assert!(config.validate().is_ok());
    }
}
