//! # letterflow-core
//!
//! Deterministic rules for metered letter generation.
//!
//! This crate answers the questions the runtime asks before and after every
//! call to the text-generation service:
//! - May this letter move to that status?
//! - Does this owner have a credit to spend?
//! - Is this service error worth retrying, and after how long?
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: Everything here is pure and synchronous
//! 2. **Single transition table**: [`transitions`] is the only source of truth
//!    for letter status moves, and every violation is an error
//! 3. **Normalized errors**: Service failures are classified once into a
//!    [`ServiceError`] with an explicit `retryable` flag
//!
//! ## Example
//!
//! ```rust
//! use letterflow_core::{validate_transition, LetterStatus, RetryPolicy};
//!
//! assert!(validate_transition(LetterStatus::Draft, LetterStatus::Generating).is_ok());
//! assert!(validate_transition(LetterStatus::Completed, LetterStatus::Draft).is_err());
//!
//! let policy = RetryPolicy::default().without_jitter();
//! assert_eq!(policy.compute_delay(2).as_millis(), 4000);
//! ```

pub mod allowance;
pub mod audit;
pub mod classify;
pub mod duration_serde;
pub mod letter;
pub mod retry;
pub mod transitions;

pub use allowance::{AllowanceAccount, AllowanceCheck};
pub use audit::{AuditActor, AuditEntry, AuditEvent};
pub use classify::{classify, is_retryable, RawServiceError, ServiceError, ServiceErrorKind};
pub use letter::{GenerationParams, Letter, LetterId, LetterStatus, OwnerId, ValidationError};
pub use retry::{AttemptOutcome, RetryAttempt, RetryPolicy};
pub use transitions::{allowed_transitions, can_transition, validate_transition, InvalidTransition};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resubmission_cycle() {
        let mut letter = Letter::new_draft(
            LetterId::new("letter-1"),
            OwnerId::new("owner-1"),
            "Notice of intent",
        );

        letter.transition_to(LetterStatus::Generating).unwrap();
        letter.transition_to(LetterStatus::Failed).unwrap();
        letter.transition_to(LetterStatus::Draft).unwrap();
        letter.transition_to(LetterStatus::Generating).unwrap();
        letter.transition_to(LetterStatus::PendingReview).unwrap();
        letter.transition_to(LetterStatus::UnderReview).unwrap();
        letter.transition_to(LetterStatus::Rejected).unwrap();
        letter.transition_to(LetterStatus::PendingReview).unwrap();
        letter.transition_to(LetterStatus::Approved).unwrap();
        letter.transition_to(LetterStatus::Completed).unwrap();

        assert!(letter.status.is_terminal());
        assert!(letter.transition_to(LetterStatus::Draft).is_err());
    }

    #[test]
    fn test_classified_rate_limit_is_retryable() {
        let raw = RawServiceError::new("Too many requests").with_status(429);
        let err = classify(&raw);
        assert!(is_retryable(&err));
        assert_eq!(err.kind, ServiceErrorKind::RateLimited);
    }
}
