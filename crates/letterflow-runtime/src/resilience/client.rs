//! Retrying client for the generation service.
//!
//! Every attempt is gated by the circuit breaker, bounded by the per-request
//! timeout and classified once through [`ProviderError::normalize`].
//! Transient failures are retried with the policy's backoff; the loop sleeps
//! cooperatively and never runs two attempts at once.

use letterflow_core::{AttemptOutcome, RetryAttempt, RetryPolicy, ServiceError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::CircuitBreaker;
use crate::providers::{GeneratedText, GenerationRequest, LlmProvider, ProviderError};

/// Why a resilient call ended without text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResilienceError {
    #[error("Circuit breaker open, call not attempted")]
    CircuitOpen,

    #[error("Permanent service error: {0}")]
    Permanent(ServiceError),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ServiceError },

    #[error("Deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        attempts: u32,
        last: Option<ServiceError>,
    },
}

impl ResilienceError {
    /// The last classified service failure, if one was observed.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            ResilienceError::CircuitOpen => None,
            ResilienceError::Permanent(error) => Some(error),
            ResilienceError::RetriesExhausted { last, .. } => Some(last),
            ResilienceError::DeadlineExceeded { last, .. } => last.as_ref(),
        }
    }
}

/// Result of a resilient call plus the per-attempt record.
#[derive(Debug)]
pub struct CallOutcome {
    pub result: Result<GeneratedText, ResilienceError>,
    pub attempts: Vec<RetryAttempt>,
}

/// Health probe result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub response_time_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generation service client with breaker gating and retries.
pub struct ResilientClient {
    provider: Arc<dyn LlmProvider>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("provider", &self.provider.name())
            .field("policy", &self.policy)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ResilientClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            breaker,
            policy,
            request_timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run `request` until it succeeds, fails permanently, exhausts the
    /// policy, is refused by the breaker, or would cross `deadline`.
    ///
    /// The deadline is checked between attempts only. An attempt in flight
    /// is bounded by the request timeout, never cut short by the deadline.
    pub async fn call(&self, request: &GenerationRequest, deadline: Option<Instant>) -> CallOutcome {
        let total = self.policy.total_attempts();
        let mut attempts = Vec::with_capacity(total as usize);
        let mut last: Option<ServiceError> = None;
        let mut attempt: u32 = 0;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return CallOutcome {
                    result: Err(ResilienceError::DeadlineExceeded {
                        attempts: attempt,
                        last,
                    }),
                    attempts,
                };
            }

            if !self.breaker.can_execute() {
                tracing::warn!(attempt, "Circuit open, refusing generation attempt");
                attempts.push(RetryAttempt {
                    attempt,
                    delay: None,
                    outcome: AttemptOutcome::Rejected,
                    duration: Duration::ZERO,
                });
                return CallOutcome {
                    result: Err(ResilienceError::CircuitOpen),
                    attempts,
                };
            }

            let started = Instant::now();
            let result = self.attempt_once(request).await;
            let duration = started.elapsed();

            let error = match result {
                Ok(text) => {
                    self.breaker.on_success();
                    attempts.push(RetryAttempt {
                        attempt,
                        delay: None,
                        outcome: AttemptOutcome::Succeeded,
                        duration,
                    });
                    return CallOutcome {
                        result: Ok(text),
                        attempts,
                    };
                }
                Err(e) => e.normalize(),
            };

            if error.kind.counts_against_dependency() {
                self.breaker.on_failure();
            }

            let mut record = RetryAttempt {
                attempt,
                delay: None,
                outcome: AttemptOutcome::Failed(error.kind),
                duration,
            };

            if !error.retryable {
                tracing::warn!(
                    attempt,
                    kind = %error.kind,
                    error = %error.raw_message,
                    "Generation failed with non-retryable error"
                );
                attempts.push(record);
                return CallOutcome {
                    result: Err(ResilienceError::Permanent(error)),
                    attempts,
                };
            }

            if attempt + 1 >= total {
                tracing::warn!(
                    attempts = total,
                    kind = %error.kind,
                    error = %error.raw_message,
                    "Generation retries exhausted"
                );
                attempts.push(record);
                return CallOutcome {
                    result: Err(ResilienceError::RetriesExhausted {
                        attempts: total,
                        last: error,
                    }),
                    attempts,
                };
            }

            let delay = self.policy.compute_delay(attempt);
            if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Next retry would cross the deadline, giving up"
                );
                attempts.push(record);
                return CallOutcome {
                    result: Err(ResilienceError::DeadlineExceeded {
                        attempts: attempt + 1,
                        last: Some(error),
                    }),
                    attempts,
                };
            }

            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                kind = %error.kind,
                error = %error.raw_message,
                "Transient generation failure, retrying"
            );
            record.delay = Some(delay);
            attempts.push(record);
            last = Some(error);

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt_once(&self, request: &GenerationRequest) -> Result<GeneratedText, ProviderError> {
        match tokio::time::timeout(self.request_timeout, self.provider.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.request_timeout)),
        }
    }

    /// Minimal direct call to the provider.
    ///
    /// Bypasses the breaker and records nothing in it.
    pub async fn health_check(&self, model: &str) -> HealthReport {
        let probe = GenerationRequest {
            prompt: "Reply with OK.".to_string(),
            system: None,
            temperature: 0.0,
            max_tokens: 8,
            model: model.to_string(),
        };

        let started = Instant::now();
        let result = self.attempt_once(&probe).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthReport {
                healthy: true,
                response_time_ms,
                error: None,
            },
            Err(e) => {
                tracing::warn!(provider = self.provider.name(), error = %e, "Health check failed");
                HealthReport {
                    healthy: false,
                    response_time_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::resilience::CircuitBreakerConfig;
    use letterflow_core::ServiceErrorKind;

    fn client(provider: Arc<ScriptedProvider>) -> ResilientClient {
        ResilientClient::new(
            provider,
            Arc::new(CircuitBreaker::default()),
            RetryPolicy::default().without_jitter(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let provider = Arc::new(ScriptedProvider::succeeding());
        let outcome = client(provider.clone()).call(&request(), None).await;

        assert!(outcome.result.is_ok());
        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_transient_failures_then_success() {
        let provider = Arc::new(ScriptedProvider::failing(overloaded(), 3));
        let client = client(provider.clone());

        let started = Instant::now();
        let outcome = client.call(&request(), None).await;
        let elapsed = started.elapsed();

        assert!(outcome.result.is_ok());
        assert_eq!(provider.calls(), 4);
        assert_eq!(elapsed, Duration::from_secs(1 + 2 + 4));

        let delays: Vec<_> = outcome.attempts.iter().map(|a| a.delay).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                None
            ]
        );
        assert_eq!(
            outcome.attempts[0].outcome,
            AttemptOutcome::Failed(ServiceErrorKind::Overloaded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let provider = Arc::new(ScriptedProvider::failing(overloaded(), 10));
        let outcome = client(provider.clone()).call(&request(), None).await;

        match outcome.result {
            Err(ResilienceError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last.kind, ServiceErrorKind::Overloaded);
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::AuthError, 1));
        let outcome = client(provider.clone()).call(&request(), None).await;

        assert!(matches!(
            outcome.result,
            Err(ResilienceError::Permanent(ref e)) if e.kind == ServiceErrorKind::Authentication
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_request_does_not_feed_breaker() {
        let bad_request = ProviderError::ApiError {
            status: 400,
            code: Some("invalid_request_error".to_string()),
            message: "bad".to_string(),
        };
        let provider = Arc::new(ScriptedProvider::failing(bad_request, 1));
        let client = client(provider);

        let _ = client.call(&request(), None).await;
        assert_eq!(client.breaker().snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_refuses_without_calling() {
        let provider = Arc::new(ScriptedProvider::succeeding());
        let client = client(provider.clone());
        for _ in 0..5 {
            client.breaker().on_failure();
        }

        let outcome = client.call(&request(), None).await;
        assert_eq!(outcome.result.unwrap_err(), ResilienceError::CircuitOpen);
        assert_eq!(provider.calls(), 0);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_mid_loop_stops_retries() {
        let provider = Arc::new(ScriptedProvider::failing(overloaded(), 10));
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        }));
        let client = ResilientClient::new(
            provider.clone(),
            breaker,
            RetryPolicy::default().without_jitter(),
            Duration::from_secs(60),
        );

        let outcome = client.call(&request(), None).await;
        assert_eq!(outcome.result.unwrap_err(), ResilienceError::CircuitOpen);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_between_attempts() {
        let provider = Arc::new(ScriptedProvider::failing(overloaded(), 10));
        let client = client(provider.clone());

        let deadline = Instant::now() + Duration::from_millis(2500);
        let outcome = client.call(&request(), Some(deadline)).await;

        match outcome.result {
            Err(ResilienceError::DeadlineExceeded { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last.map(|e| e.kind), Some(ServiceErrorKind::Overloaded));
            }
            other => panic!("Expected DeadlineExceeded, got {:?}", other),
        }
        // Attempt 0, sleep 1s, attempt 1, then a 2s sleep would cross 2.5s.
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_transient() {
        let provider = Arc::new(ScriptedProvider::succeeding().with_latency(Duration::from_secs(5)));
        let client = ResilientClient::new(
            provider.clone(),
            Arc::new(CircuitBreaker::default()),
            RetryPolicy {
                max_retries: 1,
                ..RetryPolicy::default().without_jitter()
            },
            Duration::from_secs(1),
        );

        let outcome = client.call(&request(), None).await;
        match outcome.result {
            Err(ResilienceError::RetriesExhausted { last, .. }) => {
                assert_eq!(last.kind, ServiceErrorKind::Timeout)
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_ignores_breaker() {
        let provider = Arc::new(ScriptedProvider::failing(overloaded(), 1));
        let client = client(provider);

        let report = client.health_check("claude-haiku-4-5").await;
        assert!(!report.healthy);
        assert!(report.error.is_some());
        assert_eq!(client.breaker().snapshot().failure_count, 0);

        let report = client.health_check("claude-haiku-4-5").await;
        assert!(report.healthy);
        assert_eq!(report.error, None);
    }
}
