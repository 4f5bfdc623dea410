//! Circuit breaker for the generation service.
//!
//! The breaker keeps a rolling window of call outcomes. It opens when the
//! windowed failure ratio crosses `failure_ratio` over at least
//! `minimum_samples` calls, or immediately once `failure_threshold`
//! failures accumulate. While open every call is refused without touching
//! the service. After `cooldown` the next [`CircuitBreaker::can_execute`]
//! closes it and lets exactly that call through as a probe; the call after
//! that re-evaluates the window.
//!
//! State is process-local. Each instance forms its own view of the
//! dependency.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Accumulated failures that open the circuit regardless of the ratio
    pub failure_threshold: u32,

    /// Windowed failure ratio above which the circuit opens
    pub failure_ratio: f64,

    /// Samples required before the ratio is considered
    pub minimum_samples: usize,

    /// How long samples stay in the window
    #[serde(with = "letterflow_core::duration_serde")]
    pub monitoring_window: Duration,

    /// How long the circuit stays open
    #[serde(with = "letterflow_core::duration_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_ratio: 0.5,
            minimum_samples: 10,
            monitoring_window: Duration::from_secs(5 * 60),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub is_open: bool,
    pub failure_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    success: bool,
}

#[derive(Debug, Default)]
struct BreakerState {
    is_open: bool,
    failure_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    samples: VecDeque<Sample>,
}

impl BreakerState {
    fn purge(&mut self, now: Instant, window: Duration) {
        while let Some(sample) = self.samples.front() {
            if now.saturating_duration_since(sample.at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let failures = self.samples.iter().filter(|s| !s.success).count();
        failures as f64 / self.samples.len() as f64
    }

    fn open(&mut self, now: Instant, cooldown: Duration) {
        self.is_open = true;
        self.next_attempt = Some(now + cooldown);
    }
}

/// Gates calls to the generation service.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a call may proceed now.
    ///
    /// May close an open circuit whose cooldown has elapsed, or open a
    /// closed one whose window has gone bad.
    pub fn can_execute(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.purge(now, self.config.monitoring_window);

        if state.is_open {
            match state.next_attempt {
                Some(next) if now >= next => {
                    state.is_open = false;
                    state.failure_count = 0;
                    state.next_attempt = None;
                    tracing::info!("Circuit closed after cooldown, allowing probe call");
                    return true;
                }
                _ => return false,
            }
        }

        let ratio = state.failure_ratio();
        if state.samples.len() >= self.config.minimum_samples && ratio > self.config.failure_ratio {
            state.open(now, self.config.cooldown);
            tracing::warn!(
                failure_ratio = ratio,
                samples = state.samples.len(),
                cooldown = ?self.config.cooldown,
                "Circuit opened on windowed failure ratio"
            );
            return false;
        }

        true
    }

    /// Side-effect-free availability check.
    ///
    /// `false` only while the circuit is open and its cooldown is running.
    pub fn allows_requests(&self) -> bool {
        let state = self.state.lock();
        match (state.is_open, state.next_attempt) {
            (true, Some(next)) => Instant::now() >= next,
            (true, None) => false,
            (false, _) => true,
        }
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.samples.push_back(Sample { at: now, success: true });
        state.failure_count = state.failure_count.saturating_sub(1);
    }

    /// Record a failed call.
    pub fn on_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.samples.push_back(Sample { at: now, success: false });
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure = Some(now);

        if !state.is_open && state.failure_count >= self.config.failure_threshold {
            state.open(now, self.config.cooldown);
            tracing::warn!(
                failures = state.failure_count,
                cooldown = ?self.config.cooldown,
                "Circuit opened after repeated failures"
            );
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.lock();
        CircuitBreakerSnapshot {
            is_open: state.is_open,
            failure_count: state.failure_count,
        }
    }

    /// Time since the most recent failure, if any.
    pub fn since_last_failure(&self) -> Option<Duration> {
        self.state
            .lock()
            .last_failure
            .map(|at| Instant::now().saturating_duration_since(at))
    }

    /// Forget all history and close the circuit.
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::default();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
