//! Pipeline configuration.
//!
//! `GuardConfig` bounds the cost of every compiled check: the complexity ceiling
//! caps how much untrusted text the validators will accept, the sample size caps
//! how many offending rows a plan fetches, and the hard row cap bounds the sample
//! stream independently of anything a caller requests.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default complexity ceiling applied by both validator policies and the
/// expression parser.
pub const DEFAULT_COMPLEXITY_CEILING: u32 = 50;

/// Default number of offending rows captured per check.
pub const DEFAULT_SAMPLE_SIZE: u32 = 10;

/// Default wall-clock query timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Hard cap on rows returned by any sample query, independent of the
/// caller-requested sample size.
pub const DEFAULT_SAMPLE_ROW_CAP: u32 = 10_000;

/// Configuration for check compilation and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Complexity ceiling for conditions, raw queries, and expressions.
    pub complexity_ceiling: u32,
    /// Number of offending rows fetched by the paired sample query.
    pub sample_size: u32,
    /// Wall-clock query timeout in seconds.
    pub timeout_secs: u64,
    /// Hard cap on sample rows, enforced by the execution engine.
    pub sample_row_cap: u32,
}

/// Validation errors for guard configuration.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("complexity_ceiling must be at least 1, got {0}")]
    InvalidComplexityCeiling(u32),
    #[error("timeout_secs must be at least 1, got {0}")]
    InvalidTimeout(u64),
    #[error("sample_row_cap must be at least 1, got {0}")]
    InvalidRowCap(u32),
    #[error("sample_size {size} exceeds sample_row_cap {cap}")]
    SampleSizeExceedsCap { size: u32, cap: u32 },
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            complexity_ceiling: DEFAULT_COMPLEXITY_CEILING,
            sample_size: DEFAULT_SAMPLE_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            sample_row_cap: DEFAULT_SAMPLE_ROW_CAP,
        }
    }
}

impl GuardConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the complexity ceiling.
    pub fn with_complexity_ceiling(mut self, ceiling: u32) -> Self {
        if ceiling == 0 {
            tracing::warn!("complexity_ceiling 0 clamped to 1");
        }
        self.complexity_ceiling = ceiling.max(1);
        self
    }

    /// Builder method to set the sample size.
    ///
    /// Values above the hard row cap are clamped down to it.
    pub fn with_sample_size(mut self, size: u32) -> Self {
        if size > self.sample_row_cap {
            tracing::warn!(
                "sample_size {} clamped to sample_row_cap {}",
                size,
                self.sample_row_cap
            );
        }
        self.sample_size = size.min(self.sample_row_cap);
        self
    }

    /// Builder method to set the query timeout in seconds.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        if secs == 0 {
            tracing::warn!("timeout_secs 0 clamped to 1");
        }
        self.timeout_secs = secs.max(1);
        self
    }

    /// Builder method to set the hard sample row cap.
    pub fn with_sample_row_cap(mut self, cap: u32) -> Self {
        if cap == 0 {
            tracing::warn!("sample_row_cap 0 clamped to 1");
        }
        self.sample_row_cap = cap.max(1);
        self
    }

    /// Returns the query timeout as a [`Duration`].
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validates the configuration.
    ///
    /// Returns an error if any bound is outside its valid range.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if self.complexity_ceiling == 0 {
            return Err(ConfigValidationError::InvalidComplexityCeiling(
                self.complexity_ceiling,
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidTimeout(self.timeout_secs));
        }
        if self.sample_row_cap == 0 {
            return Err(ConfigValidationError::InvalidRowCap(self.sample_row_cap));
        }
        if self.sample_size > self.sample_row_cap {
            return Err(ConfigValidationError::SampleSizeExceedsCap {
                size: self.sample_size,
                cap: self.sample_row_cap,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.complexity_ceiling, 50);
        assert_eq!(config.sample_size, 10);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.sample_row_cap, 10_000);
    }

    #[test]
    fn test_config_builder() {
        let config = GuardConfig::new()
            .with_complexity_ceiling(25)
            .with_sample_size(50)
            .with_timeout_secs(5)
            .with_sample_row_cap(1_000);

        assert_eq!(config.complexity_ceiling, 25);
        assert_eq!(config.sample_size, 50);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.sample_row_cap, 1_000);
    }

    #[test]
    fn test_config_clamping() {
        let config = GuardConfig::new()
            .with_complexity_ceiling(0)
            .with_timeout_secs(0);
        assert_eq!(config.complexity_ceiling, 1);
        assert_eq!(config.timeout_secs, 1);

        let config = GuardConfig::new()
            .with_sample_row_cap(100)
            .with_sample_size(500);
        assert_eq!(config.sample_size, 100);
    }

    #[test]
    fn test_config_validate_success() {
        assert!(GuardConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validate_sample_size_exceeds_cap() {
        // Bypass builder clamping by constructing directly
        let config = GuardConfig {
            sample_size: 20_000,
            ..GuardConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::SampleSizeExceedsCap { .. })
        ));
    }

    #[test]
    fn test_query_timeout_duration() {
        let config = GuardConfig::new().with_timeout_secs(7);
        assert_eq!(config.query_timeout(), Duration::from_secs(7));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = GuardConfig::new().with_sample_size(25);
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: GuardConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }
}
