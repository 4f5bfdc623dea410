//! Retry policy: exponential backoff with a cap and optional jitter.
//!
//! `delay(n) = min(base * multiplier^n, max_delay)`, then scaled by a random
//! factor in `[1 - jitter, 1 + jitter]` when jitter is enabled.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classify::ServiceErrorKind;
use crate::letter::ValidationError;

/// Backoff and attempt limits for calls to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(with = "crate::duration_serde")]
    pub base_delay: Duration,

    /// Growth factor per attempt
    pub multiplier: f64,

    /// Upper bound on any single delay (before jitter)
    #[serde(with = "crate::duration_serde")]
    pub max_delay: Duration,

    /// Retries after the initial attempt
    pub max_retries: u32,

    /// Jitter as a fraction of the delay (0.1 = ±10%); 0 disables it
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
            max_retries: 3,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Same policy with jitter turned off.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Initial attempt plus retries.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to sleep after failed attempt `attempt` (zero-based).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        self.compute_delay_with(attempt, &mut rand::rng())
    }

    /// [`compute_delay`](Self::compute_delay) with a caller-supplied RNG.
    pub fn compute_delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.capped_delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }

        let factor = 1.0 + rng.random_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }

    /// The un-jittered delay for `attempt`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        if capped.is_finite() {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Un-jittered delays for every retry this policy allows.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|n| self.capped_delay(n)).collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ValidationError::InvalidSetting(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ValidationError::InvalidSetting(format!(
                "retry.jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.max_delay < self.base_delay {
            return Err(ValidationError::InvalidSetting(
                "retry.max_delay must not be shorter than retry.base_delay".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed(ServiceErrorKind),
    /// The circuit breaker refused the attempt
    Rejected,
}

/// Record of one attempt, for observability and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// Zero-based attempt index
    pub attempt: u32,

    /// Sleep scheduled after this attempt, if another one follows
    pub delay: Option<Duration>,

    pub outcome: AttemptOutcome,

    /// Time spent in the call itself
    pub duration: Duration,
}
