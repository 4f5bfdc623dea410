//! The letter transition table.
//!
//! This is the only place that decides which status moves are legal:
//!
//! ```text
//! draft          -> generating | pending_review
//! generating     -> pending_review | failed
//! pending_review -> under_review | approved | rejected
//! under_review   -> approved | rejected | pending_review
//! approved       -> completed
//! rejected       -> draft | pending_review
//! failed         -> draft | generating
//! completed      -> (terminal)
//! ```
//!
//! A move outside the table is a defect in the caller and surfaces as
//! [`InvalidTransition`]. It is never dropped silently.

use thiserror::Error;

use crate::letter::LetterStatus;

/// A requested move that the table does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid letter transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: LetterStatus,
    pub to: LetterStatus,
}

/// Statuses reachable from `from` in one step.
pub fn allowed_transitions(from: LetterStatus) -> &'static [LetterStatus] {
    use crate::letter::LetterStatus::*;

    match from {
        Draft => &[Generating, PendingReview],
        Generating => &[PendingReview, Failed],
        PendingReview => &[UnderReview, Approved, Rejected],
        UnderReview => &[Approved, Rejected, PendingReview],
        Approved => &[Completed],
        Rejected => &[Draft, PendingReview],
        Failed => &[Draft, Generating],
        Completed => &[],
    }
}

/// Whether `from -> to` is in the table.
pub fn can_transition(from: LetterStatus, to: LetterStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Check `from -> to` against the table.
pub fn validate_transition(from: LetterStatus, to: LetterStatus) -> Result<(), InvalidTransition> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}
