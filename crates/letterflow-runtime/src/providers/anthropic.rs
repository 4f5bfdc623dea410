//! Anthropic Messages API provider.

use super::{
    factory::ProviderFactory,
    secrets::ServiceKey,
    GeneratedText, GenerationRequest, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable name for the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Anthropic provider.
pub struct AnthropicProvider {
    key: ServiceKey,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("key", &self.key)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AnthropicProvider {
    /// Build from provider options: `api_key` (falls back to
    /// `ANTHROPIC_API_KEY`), optional `base_url` and `timeout_secs`.
    pub fn from_config(options: &JsonValue) -> Result<Self, ProviderError> {
        let key = ServiceKey::resolve(options, "api_key", ANTHROPIC_API_KEY_ENV)?;
        let base_url = options["base_url"]
            .as_str()
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout = options["timeout_secs"]
            .as_u64()
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self {
            key,
            base_url,
            timeout,
            client: reqwest::Client::new(),
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    type_: String,
    message: String,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, ProviderError> {
        if self.key.is_empty() {
            return Err(ProviderError::AuthError);
        }

        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status.as_u16() == 401 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| ProviderError::HttpError(e.to_string()))?;

            return Err(match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => ProviderError::ApiError {
                    status: status.as_u16(),
                    code: Some(body.error.type_),
                    message: body.error.message,
                },
                Err(_) => ProviderError::ApiError {
                    status: status.as_u16(),
                    code: None,
                    message: text,
                },
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let text = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(ProviderError::ParseError(
                "response contained no text".to_string(),
            ));
        }

        Ok(GeneratedText {
            text,
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
            },
            model: body.model,
            stop_reason: body.stop_reason,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Factory for `kind: anthropic`.
///
/// ```json
/// {
///   "api_key": "sk-ant-...",        // optional, falls back to ANTHROPIC_API_KEY
///   "base_url": "https://...",      // optional
///   "timeout_secs": 60              // optional
/// }
/// ```
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let provider = AnthropicProvider::from_config(config)?;
        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ServiceKey::is_configured(config, "api_key", ANTHROPIC_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Anthropic API key required: set 'api_key' in config or {} env",
                ANTHROPIC_API_KEY_ENV
            )));
        }

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn description(&self) -> &'static str {
        "Anthropic Messages API"
    }
}
