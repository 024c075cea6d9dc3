//! Deferred deletion cleanup configuration.
//!
//! # Example
//!
//! ```toml
//! [cleanup]
//! enabled = true
//! interval_secs = 60
//! delete_delay_secs = 86400
//! batch_size = 100
//! max_retries = 5
//! retry_backoff_secs = 3600
//! dry_run = false
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Scheduling and reconciliation policy for pending deletions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupConfig {
    /// Whether the background cleanup worker runs.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between reconciliation passes.
    /// Default: 60
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Grace period applied to deferred deletions, in seconds.
    /// Default: 86400 (one day)
    #[serde(default = "default_delete_delay_secs")]
    pub delete_delay_secs: u64,

    /// Maximum records discovered per pass.
    /// Default: 100
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Records whose retry count exceeds this are parked.
    /// Default: 5
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay before a failed record becomes eligible again, in seconds.
    /// Default: 3600
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// If true, log what would be deleted without touching any store.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            delete_delay_secs: default_delete_delay_secs(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff_secs(),
            dry_run: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    60
}

fn default_delete_delay_secs() -> u64 {
    86_400
}

fn default_batch_size() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_secs() -> u64 {
    3600
}

impl CleanupConfig {
    /// Get the pass interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn delete_delay(&self) -> Duration {
        Duration::from_secs(self.delete_delay_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "cleanup.batch_size must be greater than 0".into(),
            ));
        }
        if self.enabled && self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "cleanup.interval_secs must be greater than 0".into(),
            ));
        }
        // A zero backoff makes failed records due again within the same drain.
        if self.enabled && self.retry_backoff_secs == 0 {
            return Err(ConfigError::Validation(
                "cleanup.retry_backoff_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = CleanupConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.delete_delay(), Duration::from_secs(86_400));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_backoff(), Duration::from_secs(3600));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: CleanupConfig = toml::from_str("enabled = false").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            enabled = true
            interval_secs = 30
            delete_delay_secs = 600
            batch_size = 25
            max_retries = 3
            retry_backoff_secs = 120
            dry_run = true
        "#;
        let config: CleanupConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.delete_delay(), Duration::from_secs(600));
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff(), Duration::from_secs(120));
        assert!(config.dry_run);
    }

    #[rstest]
    #[case::zero_batch("batch_size = 0")]
    #[case::zero_interval("interval_secs = 0")]
    #[case::zero_backoff("retry_backoff_secs = 0")]
    fn test_invalid_values_rejected(#[case] toml: &str) {
        let config: CleanupConfig = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_zero_interval_allowed_when_disabled() {
        let config: CleanupConfig = toml::from_str(
            r#"
            enabled = false
            interval_secs = 0
        "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<CleanupConfig, _> = toml::from_str("max_retry = 3");
        assert!(result.is_err());
    }
}
