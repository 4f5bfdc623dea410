//! API keys for the generation service.
//!
//! A key is wrapped in [`ServiceKey`] the moment it is read from provider
//! options or the environment. It prints as `[REDACTED]` and is only
//! readable through [`ServiceKey::expose`].

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a key was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Options,
    Environment,
}

pub struct ServiceKey {
    secret: SecretString,
    source: KeySource,
}

impl ServiceKey {
    /// `options[option]` if it is a string, else the `env_var` variable.
    pub fn resolve(options: &JsonValue, option: &str, env_var: &str) -> Result<Self, ProviderError> {
        let (value, source) = match options[option].as_str() {
            Some(value) => (value.to_string(), KeySource::Options),
            None => match std::env::var(env_var) {
                Ok(value) => (value, KeySource::Environment),
                Err(_) => {
                    return Err(ProviderError::NotConfigured(format!(
                        "API key missing: set provider.options.{} or {}",
                        option, env_var
                    )))
                }
            },
        };

        Ok(Self {
            secret: SecretString::from(value),
            source,
        })
    }

    /// Whether [`resolve`](Self::resolve) would find a key.
    pub fn is_configured(options: &JsonValue, option: &str, env_var: &str) -> bool {
        options[option].is_string() || std::env::var_os(env_var).is_some()
    }

    /// Only at the point the key goes on the wire.
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn source(&self) -> KeySource {
        self.source
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey([REDACTED] from {:?})", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk-letterflow-secret-0001";

    #[test]
    fn test_key_never_printed() {
        let options = serde_json::json!({"api_key": SECRET});
        let key = ServiceKey::resolve(&options, "api_key", "LETTERFLOW_TEST_KEY_UNUSED").unwrap();

        let debug = format!("{:?}", key);
        assert!(!debug.contains(SECRET));
        assert_eq!(debug, "ServiceKey([REDACTED] from Options)");
        assert_eq!(key.expose(), SECRET);
    }

    #[test]
    fn test_options_win_over_env() {
        std::env::set_var("LETTERFLOW_TEST_KEY_PRIORITY", "env-key");
        let options = serde_json::json!({"api_key": "options-key"});

        let key = ServiceKey::resolve(&options, "api_key", "LETTERFLOW_TEST_KEY_PRIORITY").unwrap();
        assert_eq!(key.expose(), "options-key");
        assert_eq!(key.source(), KeySource::Options);

        let key = ServiceKey::resolve(
            &serde_json::json!({}),
            "api_key",
            "LETTERFLOW_TEST_KEY_PRIORITY",
        )
        .unwrap();
        assert_eq!(key.expose(), "env-key");
        assert_eq!(key.source(), KeySource::Environment);

        std::env::remove_var("LETTERFLOW_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_missing_key() {
        let options = serde_json::json!({"api_key": 42});
        assert!(!ServiceKey::is_configured(&options, "api_key", "LETTERFLOW_TEST_KEY_MISSING"));

        let err = ServiceKey::resolve(&options, "api_key", "LETTERFLOW_TEST_KEY_MISSING").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("provider.options.api_key"));
        assert!(message.contains("LETTERFLOW_TEST_KEY_MISSING"));
    }
}
