//! Runtime configuration, loaded from YAML.
//!
//! ```yaml
//! retry:
//!   base_delay: 1s
//!   max_delay: 30s
//!   max_retries: 3
//! circuit_breaker:
//!   failure_threshold: 5
//!   cooldown: 60s
//! completion:
//!   model: claude-sonnet-4-5-20250514
//!   max_tokens: 1500
//! stale_generation_after: 10m
//! provider:
//!   kind: anthropic
//!   options:
//!     base_url: https://api.anthropic.com/v1
//! ```
//!
//! Every section is optional and falls back to its defaults.

use letterflow_core::{RetryPolicy, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::providers::CompletionConfig;
use crate::resilience::CircuitBreakerConfig;

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting: {0}")]
    MissingField(&'static str),
}

impl From<ValidationError> for ConfigError {
    fn from(e: ValidationError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

/// Which provider to build and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Registered provider kind (e.g. "anthropic")
    pub kind: String,

    /// Provider-specific options, passed to its factory untouched
    pub options: JsonValue,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "anthropic".to_string(),
            options: JsonValue::Object(Default::default()),
        }
    }
}

/// Settings for the generation runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub retry: RetryPolicy,

    pub circuit_breaker: CircuitBreakerConfig,

    pub completion: CompletionConfig,

    /// Letters in `generating` longer than this are swept as failed.
    /// Must exceed [`RuntimeConfig::max_generation_time`].
    #[serde(with = "letterflow_core::duration_serde")]
    pub stale_generation_after: Duration,

    /// Upper bound on a single audit append
    #[serde(with = "letterflow_core::duration_serde")]
    pub audit_timeout: Duration,

    /// Attempts at returning a credit before giving up and logging
    pub refund_attempts: u32,

    pub provider: ProviderConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            completion: CompletionConfig::default(),
            stale_generation_after: Duration::from_secs(10 * 60),
            audit_timeout: Duration::from_secs(2),
            refund_attempts: 3,
            provider: ProviderConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Upper bound on one generation call: every attempt timing out plus
    /// every backoff sleep at maximum jitter.
    pub fn max_generation_time(&self) -> Duration {
        let calls = self
            .completion
            .timeout
            .saturating_mul(self.retry.total_attempts());
        let stretch = 1.0 + self.retry.jitter.max(0.0);

        self.retry.schedule().into_iter().fold(calls, |total, delay| {
            let jittered = Duration::try_from_secs_f64(delay.as_secs_f64() * stretch)
                .unwrap_or(Duration::MAX);
            total.saturating_add(jittered)
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if !(breaker.failure_ratio > 0.0 && breaker.failure_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "circuit_breaker.failure_ratio must be in (0, 1], got {}",
                breaker.failure_ratio
            )));
        }
        if breaker.minimum_samples == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.minimum_samples must be at least 1".to_string(),
            ));
        }
        if breaker.cooldown.is_zero() || breaker.monitoring_window.is_zero() {
            return Err(ConfigError::Invalid(
                "circuit_breaker durations must be non-zero".to_string(),
            ));
        }

        if self.completion.model.trim().is_empty() {
            return Err(ConfigError::MissingField("completion.model"));
        }
        if self.completion.max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "completion.max_tokens must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.completion.temperature) {
            return Err(ConfigError::Invalid(format!(
                "completion.temperature must be in [0, 1], got {}",
                self.completion.temperature
            )));
        }
        if self.completion.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "completion.timeout must be non-zero".to_string(),
            ));
        }

        let longest = self.max_generation_time();
        if self.stale_generation_after <= longest {
            return Err(ConfigError::Invalid(format!(
                "stale_generation_after ({}) must exceed the longest possible generation ({})",
                humantime::format_duration(self.stale_generation_after),
                humantime::format_duration(longest)
            )));
        }

        if self.refund_attempts == 0 {
            return Err(ConfigError::Invalid(
                "refund_attempts must be at least 1".to_string(),
            ));
        }
        if self.provider.kind.trim().is_empty() {
            return Err(ConfigError::MissingField("provider.kind"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(60));
        assert_eq!(config.completion.max_tokens, 1500);
        assert_eq!(config.stale_generation_after, Duration::from_secs(600));
        assert_eq!(config.refund_attempts, 3);
        assert_eq!(config.provider.kind, "anthropic");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
retry:
  base_delay: 500ms
  jitter: 0
circuit_breaker:
  cooldown: 2m
completion:
  model: claude-haiku-4-5
stale_generation_after: 15m
provider:
  kind: anthropic
  options:
    base_url: https://proxy.internal/v1
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.retry.jitter, 0.0);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(120));
        assert_eq!(config.completion.model, "claude-haiku-4-5");
        assert_eq!(config.completion.max_tokens, 1500);
        assert_eq!(config.stale_generation_after, Duration::from_secs(900));
        assert_eq!(
            config.provider.options["base_url"],
            "https://proxy.internal/v1"
        );
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let cases = [
            "retry:\n  multiplier: 0.5\n",
            "circuit_breaker:\n  failure_ratio: 1.5\n",
            "circuit_breaker:\n  failure_threshold: 0\n",
            "completion:\n  max_tokens: 0\n",
            "completion:\n  temperature: 2.0\n",
            "refund_attempts: 0\n",
            "stale_generation_after: 1ms\n",
            "stale_generation_after: 0s\n",
        ];
        for yaml in cases {
            assert!(
                matches!(RuntimeConfig::from_yaml(yaml), Err(ConfigError::Invalid(_))),
                "{}",
                yaml
            );
        }
    }

    #[test]
    fn test_stale_window_must_outlast_generation() {
        let mut config = RuntimeConfig::default();
        // 4 attempts at 60s, then 1s + 2s + 4s of backoff stretched by 10% jitter.
        assert_eq!(
            config.max_generation_time(),
            Duration::from_secs(240) + Duration::from_millis(7_700)
        );

        config.stale_generation_after = config.max_generation_time();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.stale_generation_after = config.max_generation_time() + Duration::from_secs(1);
        assert!(config.validate().is_ok());

        config.completion.timeout = Duration::from_secs(300);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_model() {
        let result = RuntimeConfig::from_yaml("completion:\n  model: ''\n");
        assert!(matches!(
            result,
            Err(ConfigError::MissingField("completion.model"))
        ));
    }

    #[test]
    fn test_bad_duration_is_yaml_error() {
        let result = RuntimeConfig::from_yaml("audit_timeout: soon\n");
        assert!(matches!(result, Err(ConfigError::YamlError(_))));
    }

    #[test]
    fn test_from_missing_file() {
        let result = RuntimeConfig::from_file("/nonexistent/letterflow.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
