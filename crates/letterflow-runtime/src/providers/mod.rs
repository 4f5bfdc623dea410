//! Text-generation providers.
//!
//! [`LlmProvider`] is the single seam through which the runtime reaches the
//! external generation service. Providers report failures as
//! [`ProviderError`]; the resilience layer turns each one into a classified
//! [`ServiceError`] via [`ProviderError::normalize`] and never looks at the
//! provider-specific shape again.

use async_trait::async_trait;
use letterflow_core::{classify, RawServiceError, ServiceError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{KeySource, ServiceKey};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

/// Errors from generation providers, in transport terms.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Flatten into the boundary shape the classifier understands.
    pub fn to_raw(&self) -> RawServiceError {
        let message = self.to_string();
        match self {
            ProviderError::HttpError(_) => RawServiceError::new(message).with_code("network_error"),
            ProviderError::RateLimited { .. } => RawServiceError::new(message)
                .with_code("rate_limit_error")
                .with_status(429),
            ProviderError::ApiError { status, code, .. } => {
                let raw = RawServiceError::new(message).with_status(*status);
                match code {
                    Some(code) => raw.with_code(code.clone()),
                    None => raw,
                }
            }
            ProviderError::ParseError(_) => RawServiceError::new(message).with_code("api_error"),
            ProviderError::AuthError => RawServiceError::new(message)
                .with_code("authentication_error")
                .with_status(401),
            ProviderError::Timeout(_) => RawServiceError::new(message).with_code("timeout"),
            ProviderError::NotConfigured(_) => {
                RawServiceError::new(message).with_code("authentication_error")
            }
        }
    }

    /// Classify this failure once, at the service boundary.
    pub fn normalize(&self) -> ServiceError {
        classify(&self.to_raw())
    }
}

/// A single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,

    #[serde(default)]
    pub system: Option<String>,

    pub temperature: f32,

    pub max_tokens: u32,

    pub model: String,
}

/// Settings applied to every generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub model: String,

    pub max_tokens: u32,

    pub temperature: f32,

    /// Per-request timeout enforced by the provider
    #[serde(with = "letterflow_core::duration_serde")]
    pub timeout: Duration,

    /// Replaces the built-in system prompt when set
    pub system_prompt: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250514".to_string(),
            max_tokens: 1500,
            temperature: 0.7,
            timeout: Duration::from_secs(60),
            system_prompt: None,
        }
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Text returned by a successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub stop_reason: Option<String>,
}

/// The external text-generation service.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one generation. Implementations must not retry internally.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, ProviderError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use letterflow_core::ServiceErrorKind;

    #[test]
    fn test_normalize_transport_errors() {
        let cases = [
            (ProviderError::HttpError("reset".into()), ServiceErrorKind::Network, true),
            (
                ProviderError::RateLimited { retry_after: None },
                ServiceErrorKind::RateLimited,
                true,
            ),
            (
                ProviderError::Timeout(Duration::from_secs(60)),
                ServiceErrorKind::Timeout,
                true,
            ),
            (ProviderError::ParseError("eof".into()), ServiceErrorKind::ServerError, true),
            (ProviderError::AuthError, ServiceErrorKind::Authentication, false),
            (
                ProviderError::NotConfigured("no key".into()),
                ServiceErrorKind::Authentication,
                false,
            ),
        ];

        for (error, kind, retryable) in cases {
            let normalized = error.normalize();
            assert_eq!(normalized.kind, kind, "{}", error);
            assert_eq!(normalized.retryable, retryable, "{}", error);
        }
    }

    #[test]
    fn test_normalize_api_error_uses_status_then_code() {
        let overloaded = ProviderError::ApiError {
            status: 529,
            code: Some("overloaded_error".into()),
            message: "Overloaded".into(),
        };
        assert_eq!(overloaded.normalize().kind, ServiceErrorKind::Overloaded);

        let bad_request = ProviderError::ApiError {
            status: 400,
            code: Some("invalid_request_error".into()),
            message: "max_tokens: too large".into(),
        };
        let normalized = bad_request.normalize();
        assert_eq!(normalized.kind, ServiceErrorKind::MalformedRequest);
        assert!(!normalized.retryable);
        assert_eq!(normalized.http_status, Some(400));
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 120,
            completion_tokens: 30,
        };
        assert_eq!(usage.total(), 150);
    }
}
