//! Resilience patterns for the generation service.
//!
//! - Circuit breaker that stops calls to a persistently failing dependency
//! - Resilient client: breaker-gated retries with exponential backoff

mod circuit_breaker;
mod client;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
pub use client::{CallOutcome, HealthReport, ResilienceError, ResilientClient};

#[cfg(test)]
pub(crate) use client::testing;
