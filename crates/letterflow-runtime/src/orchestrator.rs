//! Generation orchestrator.
//!
//! Runs one metered generation end to end:
//! 1. Validate input and the letter's current status
//! 2. Refuse early while the circuit breaker is open (nothing is spent)
//! 3. Check and atomically deduct one credit
//! 4. Claim the letter by moving it to `generating` (compare-and-set)
//! 5. Call the generation service through the resilient client
//! 6. On success store the text and move to `pending_review` in one
//!    conditional write; on terminal failure move to `failed` and refund
//!    the credit
//!
//! Every call that gets past step 3 ends with either content and a spent
//! credit, or `failed` and a refund. A crash in between leaves the letter in
//! `generating`, where [`GenerationOrchestrator::recover_stale_generations`]
//! picks it up.

use chrono::Utc;
use letterflow_core::{
    validate_transition, AuditActor, AuditEntry, AuditEvent, GenerationParams, InvalidTransition,
    LetterId, LetterStatus, OwnerId, RetryAttempt, ValidationError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

use crate::audit::{append_best_effort, AuditSink, TracingAuditSink};
use crate::config::{ConfigError, RuntimeConfig};
use crate::ledger::{AllowanceLedger, AllowanceStore, LedgerError};
use crate::letters::{LetterStore, StoreError};
use crate::memory::InMemoryStore;
use crate::prompts;
use crate::providers::LlmProvider;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerSnapshot, HealthReport, ResilienceError, ResilientClient,
};

/// Errors returned to the caller before or instead of a generation outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Allowance exhausted for owner {0}")]
    AllowanceExhausted(OwnerId),

    #[error("Circuit breaker open, generation not attempted")]
    CircuitOpen,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Letter not found: {0}")]
    LetterNotFound(LetterId),

    #[error("Letter {letter} changed concurrently, expected status {expected}")]
    Conflict {
        letter: LetterId,
        expected: LetterStatus,
    },

    #[error("Allowance ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Letter store error: {0}")]
    Store(#[from] StoreError),
}

/// How a generation ended once a credit was spent.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub letter_id: LetterId,

    /// `pending_review` or `failed`
    pub status: LetterStatus,

    pub content: Option<String>,

    /// Failure reason for the caller
    pub error: Option<String>,

    pub failure: Option<ResilienceError>,

    pub attempts: Vec<RetryAttempt>,

    /// Whether the spent credit was returned
    pub credit_refunded: bool,
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        self.status == LetterStatus::PendingReview
    }
}

/// Result of a stale-generation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Letters moved to `failed` by this sweep
    pub recovered: Vec<LetterId>,

    /// Recovered letters whose refund could not be applied
    pub refund_failures: Vec<LetterId>,

    /// Letters another writer moved first
    pub skipped: usize,
}

/// Drives metered generations. Construct with [`GenerationOrchestratorBuilder`].
pub struct GenerationOrchestrator {
    client: ResilientClient,
    breaker: Arc<CircuitBreaker>,
    ledger: AllowanceLedger,
    letters: Arc<dyn LetterStore>,
    audit: Arc<dyn AuditSink>,
    config: RuntimeConfig,
}

impl std::fmt::Debug for GenerationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("client", &self.client)
            .field("breaker", &self.breaker.snapshot())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GenerationOrchestrator {
    pub fn builder() -> GenerationOrchestratorBuilder {
        GenerationOrchestratorBuilder::new()
    }

    /// Generate `letter_id` for `owner` with no deadline.
    pub async fn generate_letter(
        &self,
        owner: &OwnerId,
        letter_id: &LetterId,
        params: &GenerationParams,
    ) -> Result<GenerationOutcome, GenerationError> {
        self.run(owner, letter_id, params, None).await
    }

    /// Generate, giving up between attempts once `deadline` would be crossed.
    ///
    /// Giving up takes the normal failure path, so the credit is refunded.
    pub async fn generate_letter_with_deadline(
        &self,
        owner: &OwnerId,
        letter_id: &LetterId,
        params: &GenerationParams,
        deadline: Instant,
    ) -> Result<GenerationOutcome, GenerationError> {
        self.run(owner, letter_id, params, Some(deadline)).await
    }

    async fn run(
        &self,
        owner: &OwnerId,
        letter_id: &LetterId,
        params: &GenerationParams,
        deadline: Option<Instant>,
    ) -> Result<GenerationOutcome, GenerationError> {
        params.validate()?;

        let letter = self
            .letters
            .load(letter_id)
            .await?
            .ok_or_else(|| GenerationError::LetterNotFound(letter_id.clone()))?;
        if &letter.owner != owner {
            return Err(ValidationError::NotOwner {
                letter: letter_id.clone(),
                owner: owner.clone(),
            }
            .into());
        }

        let from = letter.status;
        validate_transition(from, LetterStatus::Generating)?;

        if !self.breaker.allows_requests() {
            tracing::warn!(owner = %owner, letter_id = %letter_id, "Circuit open, generation refused before deduction");
            return Err(GenerationError::CircuitOpen);
        }

        let check = self.ledger.check_and_reserve(owner).await?;
        if !check.allowed || !self.ledger.deduct(owner).await? {
            tracing::info!(owner = %owner, letter_id = %letter_id, "Allowance exhausted");
            return Err(GenerationError::AllowanceExhausted(owner.clone()));
        }

        match self
            .letters
            .compare_and_set_status(letter_id, from, LetterStatus::Generating)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.refund_with_retries(owner, letter_id).await;
                return Err(GenerationError::Conflict {
                    letter: letter_id.clone(),
                    expected: from,
                });
            }
            Err(e) => {
                self.refund_with_retries(owner, letter_id).await;
                return Err(e.into());
            }
        }

        self.record(
            AuditEntry::transition(
                letter_id.clone(),
                owner.clone(),
                from,
                LetterStatus::Generating,
                AuditActor::Owner(owner.clone()),
            ),
        )
        .await;

        let request = prompts::build_request(params, &self.config.completion);
        let call = self.client.call(&request, deadline).await;

        let generated = match call.result {
            Ok(generated) => generated,
            Err(failure) => {
                return self
                    .fail_generation(owner, letter_id, failure.to_string(), Some(failure), call.attempts)
                    .await;
            }
        };

        match self.letters.complete_generation(letter_id, &generated.text).await {
            Ok(true) => {}
            Ok(false) => {
                // Whoever moved it out of `generating` owns the refund.
                tracing::warn!(letter_id = %letter_id, "Letter left generating before its content landed, content discarded");
                return Err(GenerationError::Conflict {
                    letter: letter_id.clone(),
                    expected: LetterStatus::Generating,
                });
            }
            Err(e) => {
                let reason = format!("failed to store generated content: {}", e);
                return self
                    .fail_generation(owner, letter_id, reason, None, call.attempts)
                    .await;
            }
        }

        self.record(
            AuditEntry::transition(
                letter_id.clone(),
                owner.clone(),
                LetterStatus::Generating,
                LetterStatus::PendingReview,
                AuditActor::System,
            )
            .with_event(AuditEvent::GenerationSucceeded)
            .with_note(format!(
                "{} tokens, {} attempt(s)",
                generated.usage.total(),
                call.attempts.len()
            )),
        )
        .await;

        if let Err(e) = self.ledger.record_generation(owner).await {
            tracing::warn!(owner = %owner, error = %e, "Failed to record lifetime generation");
        }

        tracing::info!(
            owner = %owner,
            letter_id = %letter_id,
            attempts = call.attempts.len(),
            tokens = generated.usage.total(),
            "Letter generated"
        );

        Ok(GenerationOutcome {
            letter_id: letter_id.clone(),
            status: LetterStatus::PendingReview,
            content: Some(generated.text),
            error: None,
            failure: None,
            attempts: call.attempts,
            credit_refunded: false,
        })
    }

    async fn fail_generation(
        &self,
        owner: &OwnerId,
        letter_id: &LetterId,
        reason: String,
        failure: Option<ResilienceError>,
        attempts: Vec<RetryAttempt>,
    ) -> Result<GenerationOutcome, GenerationError> {
        // The refund is only safe once this call owns the move out of
        // `generating`; otherwise the stale sweep may refund it too.
        match self
            .letters
            .compare_and_set_status(letter_id, LetterStatus::Generating, LetterStatus::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(GenerationError::Conflict {
                    letter: letter_id.clone(),
                    expected: LetterStatus::Generating,
                })
            }
            Err(e) => {
                tracing::error!(
                    letter_id = %letter_id,
                    error = %e,
                    "Could not mark letter failed; left in generating for recovery"
                );
                return Err(e.into());
            }
        }

        let credit_refunded = self.refund_with_retries(owner, letter_id).await;

        tracing::warn!(
            owner = %owner,
            letter_id = %letter_id,
            reason = %reason,
            credit_refunded,
            "Generation failed"
        );

        self.record(
            AuditEntry::transition(
                letter_id.clone(),
                owner.clone(),
                LetterStatus::Generating,
                LetterStatus::Failed,
                AuditActor::System,
            )
            .with_event(AuditEvent::GenerationFailed)
            .with_note(reason.clone()),
        )
        .await;

        if credit_refunded {
            self.record(
                AuditEntry::event(letter_id.clone(), owner.clone(), AuditEvent::CreditRefunded)
                    .with_note("1 credit"),
            )
            .await;
        }

        Ok(GenerationOutcome {
            letter_id: letter_id.clone(),
            status: LetterStatus::Failed,
            content: None,
            error: Some(reason),
            failure,
            attempts,
            credit_refunded,
        })
    }

    /// Return one credit, retrying with the policy's backoff.
    async fn refund_with_retries(&self, owner: &OwnerId, letter_id: &LetterId) -> bool {
        let attempts = self.config.refund_attempts.max(1);

        for attempt in 0..attempts {
            match self.ledger.refund(owner, 1).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(owner = %owner, letter_id = %letter_id, attempt, error = %e, "Refund attempt failed");
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.config.retry.compute_delay(attempt)).await;
                    }
                }
            }
        }

        tracing::error!(
            owner = %owner,
            letter_id = %letter_id,
            attempts,
            "Credit refund failed, balance needs manual reconciliation"
        );
        false
    }

    /// Fail and refund letters stuck in `generating` past
    /// `stale_generation_after`.
    ///
    /// Safe to run from several instances at once: each letter is claimed
    /// with a compare-and-set and only the winner refunds.
    pub async fn recover_stale_generations(&self) -> Result<RecoveryReport, GenerationError> {
        let mut report = RecoveryReport::default();

        let Ok(age) = chrono::Duration::from_std(self.config.stale_generation_after) else {
            return Ok(report);
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return Ok(report);
        };

        let stuck = self.letters.list_stuck_generating(cutoff).await?;
        for letter in stuck {
            let claimed = self
                .letters
                .compare_and_set_status(&letter.id, LetterStatus::Generating, LetterStatus::Failed)
                .await?;
            if !claimed {
                report.skipped += 1;
                continue;
            }

            let refunded = self.refund_with_retries(&letter.owner, &letter.id).await;
            tracing::warn!(
                letter_id = %letter.id,
                owner = %letter.owner,
                refunded,
                "Recovered stale generation"
            );

            self.record(
                AuditEntry::transition(
                    letter.id.clone(),
                    letter.owner.clone(),
                    LetterStatus::Generating,
                    LetterStatus::Failed,
                    AuditActor::System,
                )
                .with_event(AuditEvent::StaleGenerationRecovered)
                .with_note(format!(
                    "generation exceeded {}",
                    humantime::format_duration(self.config.stale_generation_after)
                )),
            )
            .await;

            if refunded {
                self.record(
                    AuditEntry::event(letter.id.clone(), letter.owner.clone(), AuditEvent::CreditRefunded)
                        .with_note("1 credit"),
                )
                .await;
            } else {
                report.refund_failures.push(letter.id.clone());
            }
            report.recovered.push(letter.id);
        }

        Ok(report)
    }

    pub fn circuit_breaker_state(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn health_check(&self) -> HealthReport {
        self.client.health_check(&self.config.completion.model).await
    }

    pub fn ledger(&self) -> &AllowanceLedger {
        &self.ledger
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    async fn record(&self, entry: AuditEntry) {
        append_best_effort(self.audit.as_ref(), entry, self.config.audit_timeout).await;
    }
}

/// Builder for [`GenerationOrchestrator`].
pub struct GenerationOrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    letters: Option<Arc<dyn LetterStore>>,
    allowances: Option<Arc<dyn AllowanceStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    config: RuntimeConfig,
}

impl GenerationOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            letters: None,
            allowances: None,
            audit: None,
            config: RuntimeConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn letters(mut self, letters: Arc<dyn LetterStore>) -> Self {
        self.letters = Some(letters);
        self
    }

    pub fn allowances(mut self, allowances: Arc<dyn AllowanceStore>) -> Self {
        self.allowances = Some(allowances);
        self
    }

    /// Use one in-memory store for both letters and allowances.
    pub fn memory_store(self, store: Arc<InMemoryStore>) -> Self {
        self.letters(store.clone()).allowances(store)
    }

    /// Defaults to [`TracingAuditSink`].
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<GenerationOrchestrator, ConfigError> {
        self.config.validate()?;

        let provider = self.provider.ok_or(ConfigError::MissingField("provider"))?;
        let letters = self.letters.ok_or(ConfigError::MissingField("letter store"))?;
        let allowances = self
            .allowances
            .ok_or(ConfigError::MissingField("allowance store"))?;
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(TracingAuditSink) as Arc<dyn AuditSink>);

        let breaker = Arc::new(CircuitBreaker::new(self.config.circuit_breaker.clone()));
        let client = ResilientClient::new(
            provider,
            breaker.clone(),
            self.config.retry.clone(),
            self.config.completion.timeout,
        );

        Ok(GenerationOrchestrator {
            client,
            breaker,
            ledger: AllowanceLedger::new(allowances),
            letters,
            audit,
            config: self.config,
        })
    }
}

impl Default for GenerationOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
