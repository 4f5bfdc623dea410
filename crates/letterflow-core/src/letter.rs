//! Letter model: identities, status, content, and generation parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::transitions::{validate_transition, InvalidTransition};

/// Maximum length of free-form generation details, in characters.
pub const MAX_DETAILS_CHARS: usize = 10_000;

/// Maximum length of short generation fields (subject, names), in characters.
pub const MAX_FIELD_CHARS: usize = 200;

/// Errors for malformed input. Never retried, never touches allowance.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field '{field}' exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("Unknown letter status: {0}")]
    UnknownStatus(String),

    #[error("Letter {letter} does not belong to owner {owner}")]
    NotOwner { letter: LetterId, owner: OwnerId },

    #[error("Amount must be positive")]
    NonPositiveAmount,

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// Identifier of the account owner whose allowance pays for generations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LetterId(String);

impl LetterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LetterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Workflow status of a letter.
///
/// Moves between variants are governed by [`crate::transitions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterStatus {
    Draft,
    Generating,
    PendingReview,
    UnderReview,
    Approved,
    Rejected,
    Failed,
    Completed,
}

impl LetterStatus {
    /// Every status, in workflow order.
    pub const ALL: [LetterStatus; 8] = [
        LetterStatus::Draft,
        LetterStatus::Generating,
        LetterStatus::PendingReview,
        LetterStatus::UnderReview,
        LetterStatus::Approved,
        LetterStatus::Rejected,
        LetterStatus::Failed,
        LetterStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterStatus::Draft => "draft",
            LetterStatus::Generating => "generating",
            LetterStatus::PendingReview => "pending_review",
            LetterStatus::UnderReview => "under_review",
            LetterStatus::Approved => "approved",
            LetterStatus::Rejected => "rejected",
            LetterStatus::Failed => "failed",
            LetterStatus::Completed => "completed",
        }
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LetterStatus::Completed)
    }
}

impl fmt::Display for LetterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LetterStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LetterStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStatus(s.to_string()))
    }
}

/// A letter owned by a single account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Letter {
    pub id: LetterId,
    pub owner: OwnerId,
    pub status: LetterStatus,
    pub title: String,

    /// Owner-entered draft text, if any
    #[serde(default)]
    pub draft_content: Option<String>,

    /// Text returned by the generation service
    #[serde(default)]
    pub generated_content: Option<String>,

    /// Reviewer-approved text
    #[serde(default)]
    pub final_content: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set while the letter is in `generating`; used by the stale sweep
    #[serde(default)]
    pub generation_started_at: Option<DateTime<Utc>>,
}

impl Letter {
    /// Create a new letter in `draft`.
    pub fn new_draft(id: LetterId, owner: OwnerId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            status: LetterStatus::Draft,
            title: title.into(),
            draft_content: None,
            generated_content: None,
            final_content: None,
            created_at: now,
            updated_at: now,
            generation_started_at: None,
        }
    }

    /// Move to `next`, rejecting anything outside the transition table.
    pub fn transition_to(&mut self, next: LetterStatus) -> Result<(), InvalidTransition> {
        validate_transition(self.status, next)?;
        self.apply_status(next);
        Ok(())
    }

    /// Set the status and its bookkeeping without consulting the table.
    ///
    /// Stores call this after they have validated and won a compare-and-set.
    pub fn apply_status(&mut self, next: LetterStatus) {
        let now = Utc::now();
        self.generation_started_at = if next == LetterStatus::Generating {
            Some(now)
        } else {
            None
        };
        self.status = next;
        self.updated_at = now;
    }
}

/// Caller-supplied inputs for a generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Kind of letter (e.g. "demand", "complaint", "notice")
    pub letter_type: String,

    pub sender_name: String,

    pub recipient_name: String,

    pub subject: String,

    /// Facts the letter must convey
    pub details: String,

    /// Optional tone hint (e.g. "formal", "firm")
    #[serde(default)]
    pub tone: Option<String>,
}

impl GenerationParams {
    /// Reject malformed input before any allowance is touched.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let short_fields = [
            ("letter_type", &self.letter_type),
            ("sender_name", &self.sender_name),
            ("recipient_name", &self.recipient_name),
            ("subject", &self.subject),
        ];

        for (field, value) in short_fields {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(field));
            }
            if value.chars().count() > MAX_FIELD_CHARS {
                return Err(ValidationError::TooLong {
                    field,
                    max: MAX_FIELD_CHARS,
                });
            }
        }

        if self.details.trim().is_empty() {
            return Err(ValidationError::MissingField("details"));
        }
        if self.details.chars().count() > MAX_DETAILS_CHARS {
            return Err(ValidationError::TooLong {
                field: "details",
                max: MAX_DETAILS_CHARS,
            });
        }

        if let Some(tone) = &self.tone {
            if tone.chars().count() > MAX_FIELD_CHARS {
                return Err(ValidationError::TooLong {
                    field: "tone",
                    max: MAX_FIELD_CHARS,
                });
            }
        }

        Ok(())
    }
}
