//! Configuration for memory limit controllers.
//!
//! A [`LimiterConfig`] is built in code with the `with_*` methods or loaded
//! from TOML:
//!
//! ```toml
//! max_memory_bytes = 67108864
//! trigger_threshold_percent = 95.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LimitError, LimitResult};

/// Default ceiling handed to messaging clients that do not configure one.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Configuration for a memory limit controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Ceiling in bytes. Zero disables the limit entirely.
    pub max_memory_bytes: u64,

    /// Usage percentage (0 to 100) at which the trigger callback fires.
    ///
    /// `None` leaves the controller without a trigger.
    pub trigger_threshold_percent: Option<f64>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            trigger_threshold_percent: None,
        }
    }
}

impl LimiterConfig {
    /// Create a new limiter configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration with no ceiling.
    pub fn unlimited() -> Self {
        Self {
            max_memory_bytes: 0,
            trigger_threshold_percent: None,
        }
    }

    /// Set the ceiling in bytes.
    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Set the trigger threshold as a percentage of the ceiling.
    pub fn with_trigger_threshold(mut self, percent: f64) -> Self {
        self.trigger_threshold_percent = Some(percent);
        self
    }

    /// Whether this configuration enforces a ceiling.
    pub fn is_memory_limited(&self) -> bool {
        self.max_memory_bytes > 0
    }

    /// The trigger threshold as a fraction of the ceiling.
    pub fn trigger_fraction(&self) -> Option<f64> {
        self.trigger_threshold_percent.map(|p| p / 100.0)
    }

    /// Check the configuration for values the controller cannot honour.
    pub fn validate(&self) -> LimitResult<()> {
        let Some(percent) = self.trigger_threshold_percent else {
            return Ok(());
        };

        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(LimitError::InvalidConfig(format!(
                "trigger threshold must be within 0..=100 percent, got {percent}"
            )));
        }

        if !self.is_memory_limited() {
            return Err(LimitError::InvalidConfig(
                "trigger threshold requires a non-zero max_memory_bytes".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse and validate a configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> LimitResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> LimitResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_config_defaults() {
        let config = LimiterConfig::default();
        assert_eq!(config.max_memory_bytes, DEFAULT_MAX_MEMORY_BYTES);
        assert!(config.trigger_threshold_percent.is_none());
        assert!(config.is_memory_limited());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_limiter_config_builder() {
        let config = LimiterConfig::new()
            .with_max_memory(100)
            .with_trigger_threshold(95.0);

        assert_eq!(config.max_memory_bytes, 100);
        assert_eq!(config.trigger_fraction(), Some(0.95));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range() {
        for percent in [-1.0, 100.5, f64::NAN, f64::INFINITY] {
            let config = LimiterConfig::new().with_trigger_threshold(percent);
            assert!(matches!(
                config.validate(),
                Err(LimitError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_threshold_requires_ceiling() {
        let config = LimiterConfig::unlimited().with_trigger_threshold(50.0);
        assert!(!config.is_memory_limited());
        assert!(matches!(
            config.validate(),
            Err(LimitError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_toml() {
        let config = LimiterConfig::from_toml_str(
            r#"
            max_memory_bytes = 1024
            trigger_threshold_percent = 80.0
            "#,
        )
        .unwrap();
        assert_eq!(config.max_memory_bytes, 1024);
        assert_eq!(config.trigger_threshold_percent, Some(80.0));

        let partial = LimiterConfig::from_toml_str("trigger_threshold_percent = 50.0").unwrap();
        assert_eq!(partial.max_memory_bytes, DEFAULT_MAX_MEMORY_BYTES);
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(matches!(
            LimiterConfig::from_toml_str("max_memory_bytes = \"lots\""),
            Err(LimitError::Parse(_))
        ));
        assert!(matches!(
            LimiterConfig::from_toml_str("trigger_threshold_percent = 150.0"),
            Err(LimitError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_missing_file() {
        let err = LimiterConfig::from_file("/nonexistent/memlimit.toml").unwrap_err();
        assert!(matches!(err, LimitError::Io(_)));
    }
}
