//! Letter persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use letterflow_core::{Letter, LetterId, LetterStatus};
use thiserror::Error;

/// Errors from the letter store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Letter store unavailable: {0}")]
    Unavailable(String),

    #[error("Letter not found: {0}")]
    NotFound(LetterId),

    #[error("Letter already exists: {0}")]
    AlreadyExists(LetterId),
}

/// Text written alongside a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LetterContent<'a> {
    /// Owner's hand-written text
    Draft(&'a str),
    /// Output of the generation service
    Generated(&'a str),
    /// Reviewer's approved text
    Final(&'a str),
}

impl LetterContent<'_> {
    pub fn write_to(self, letter: &mut Letter) {
        match self {
            LetterContent::Draft(text) => letter.draft_content = Some(text.to_string()),
            LetterContent::Generated(text) => letter.generated_content = Some(text.to_string()),
            LetterContent::Final(text) => letter.final_content = Some(text.to_string()),
        }
    }
}

/// Durable storage for letters.
///
/// Status changes go through [`compare_and_set_status`], which must be
/// atomic in the backing store. Callers validate the transition first; the
/// store only guarantees that exactly one of several racing writers wins.
///
/// [`compare_and_set_status`]: LetterStore::compare_and_set_status
#[async_trait]
pub trait LetterStore: Send + Sync {
    async fn load(&self, id: &LetterId) -> Result<Option<Letter>, StoreError>;

    async fn insert(&self, letter: Letter) -> Result<(), StoreError>;

    /// Set the status to `next` iff it is currently `expected`.
    ///
    /// `Ok(false)` means another writer got there first.
    async fn compare_and_set_status(
        &self,
        id: &LetterId,
        expected: LetterStatus,
        next: LetterStatus,
    ) -> Result<bool, StoreError>;

    /// [`compare_and_set_status`] that also writes `content`, all or nothing.
    ///
    /// On `Ok(false)` the letter is untouched, content included.
    ///
    /// [`compare_and_set_status`]: LetterStore::compare_and_set_status
    async fn compare_and_set_with_content(
        &self,
        id: &LetterId,
        expected: LetterStatus,
        next: LetterStatus,
        content: LetterContent<'_>,
    ) -> Result<bool, StoreError>;

    /// Land generated text and move `generating -> pending_review` together.
    ///
    /// `Ok(false)` means the letter already left `generating` (for example a
    /// stale sweep failed it) and the text was discarded.
    async fn complete_generation(&self, id: &LetterId, content: &str) -> Result<bool, StoreError> {
        self.compare_and_set_with_content(
            id,
            LetterStatus::Generating,
            LetterStatus::PendingReview,
            LetterContent::Generated(content),
        )
        .await
    }

    /// Letters in `generating` whose generation started before `started_before`.
    async fn list_stuck_generating(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<Letter>, StoreError>;
}
