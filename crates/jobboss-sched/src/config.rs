//! Boss configuration.

use std::time::Duration;

use crate::error::{SchedError, SchedResult};

/// Resolved scalars the boss loop runs with. Built once and passed by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BossConfig {
    /// Sleep between iterations when there is no capacity or no pending work.
    /// Also bounds cancellation and MIA-detection latency.
    pub poll_interval: Duration,

    /// Maximum number of concurrently running employees.
    pub employee_limit: usize,

    /// Delete finished jobs older than this. `None` keeps everything.
    pub retention: Option<Duration>,

    /// Ceiling for the backoff after a failed store round-trip.
    pub store_backoff_max: Duration,
}

impl Default for BossConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            employee_limit: 4,
            retention: None,
            store_backoff_max: Duration::from_secs(30),
        }
    }
}

impl BossConfig {
    pub fn with_employee_limit(mut self, employee_limit: usize) -> Self {
        self.employee_limit = employee_limit;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SchedResult<()> {
        if self.employee_limit == 0 {
            return Err(SchedError::ConfigError(
                "employee_limit must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SchedError::ConfigError(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.store_backoff_max < self.poll_interval {
            return Err(SchedError::ConfigError(
                "store_backoff_max must not be shorter than poll_interval".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retrying after `failures` consecutive store errors.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
        self.poll_interval
            .saturating_mul(factor)
            .min(self.store_backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BossConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.employee_limit, 4);
        assert!(config.retention.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(BossConfig::default().with_employee_limit(0).validate().is_err());
        assert!(BossConfig::default()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = BossConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(500));
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(3), Duration::from_secs(4));
        assert_eq!(config.backoff(10), Duration::from_secs(30));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(30));
    }
}
