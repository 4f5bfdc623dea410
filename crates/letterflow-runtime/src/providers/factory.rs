//! Provider construction from configuration.
//!
//! The runtime config names a provider `kind` plus free-form JSON options.
//! Factories registered under that kind turn the options into a provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds one kind of provider from JSON options.
pub trait ProviderFactory: Send + Sync {
    /// Kind name used in configuration (e.g. "anthropic").
    fn provider_type(&self) -> &'static str;

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check options without building anything.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    fn description(&self) -> &'static str {
        "Text generation provider"
    }
}

/// Registered provider factories, keyed by kind.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one of the same kind.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let factory = self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })?;

        factory.validate_config(config)?;
        factory.create(config)
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// Registry with every provider compiled into this build.
    #[cfg(feature = "anthropic")]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::AnthropicProviderFactory));
        registry
    }

    /// Registry with every provider compiled into this build.
    #[cfg(not(feature = "anthropic"))]
    pub fn with_defaults() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}
