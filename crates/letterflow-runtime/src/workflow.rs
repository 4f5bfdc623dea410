//! Owner and reviewer actions on letters.
//!
//! Each action is validated against the transition table, applied with a
//! compare-and-set on the stored status (together with any text it carries)
//! and then audited. The `generating`
//! status belongs to the orchestrator and cannot be entered or left here.

use letterflow_core::{
    validate_transition, AuditActor, AuditEntry, InvalidTransition, Letter, LetterId,
    LetterStatus, OwnerId, ValidationError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::audit::{append_best_effort, AuditSink};
use crate::letters::{LetterContent, LetterStore, StoreError};

/// Errors from workflow actions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Letter not found: {0}")]
    NotFound(LetterId),

    #[error("Letter {letter} changed concurrently, expected status {expected}")]
    Conflict {
        letter: LetterId,
        expected: LetterStatus,
    },

    #[error("Transition {from} -> {to} is driven by generation only")]
    GenerationOnly { from: LetterStatus, to: LetterStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Review workflow over a [`LetterStore`].
pub struct LetterWorkflow {
    letters: Arc<dyn LetterStore>,
    audit: Arc<dyn AuditSink>,
    audit_timeout: Duration,
}

impl LetterWorkflow {
    pub fn new(letters: Arc<dyn LetterStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            letters,
            audit,
            audit_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_audit_timeout(mut self, timeout: Duration) -> Self {
        self.audit_timeout = timeout;
        self
    }

    /// Create a new letter in `draft`.
    pub async fn create_draft(
        &self,
        id: LetterId,
        owner: OwnerId,
        title: impl Into<String>,
    ) -> Result<Letter, WorkflowError> {
        let letter = Letter::new_draft(id, owner, title);
        self.letters.insert(letter.clone()).await?;
        Ok(letter)
    }

    /// Move a letter to `to` on behalf of `actor`.
    pub async fn transition(
        &self,
        id: &LetterId,
        to: LetterStatus,
        actor: AuditActor,
        note: Option<String>,
    ) -> Result<Letter, WorkflowError> {
        self.apply(id, to, actor, note, None).await
    }

    /// Status change plus optional content, written in one conditional store call.
    async fn apply(
        &self,
        id: &LetterId,
        to: LetterStatus,
        actor: AuditActor,
        note: Option<String>,
        content: Option<LetterContent<'_>>,
    ) -> Result<Letter, WorkflowError> {
        let letter = self.load(id).await?;
        let from = letter.status;

        validate_transition(from, to)?;
        if from == LetterStatus::Generating || to == LetterStatus::Generating {
            return Err(WorkflowError::GenerationOnly { from, to });
        }

        let swapped = match content {
            Some(content) => {
                self.letters
                    .compare_and_set_with_content(id, from, to, content)
                    .await?
            }
            None => self.letters.compare_and_set_status(id, from, to).await?,
        };
        if !swapped {
            return Err(WorkflowError::Conflict {
                letter: id.clone(),
                expected: from,
            });
        }

        tracing::info!(letter_id = %id, from = %from, to = %to, actor = %actor, "Letter transitioned");

        let mut entry = AuditEntry::transition(id.clone(), letter.owner.clone(), from, to, actor);
        if let Some(note) = note {
            entry = entry.with_note(note);
        }
        append_best_effort(self.audit.as_ref(), entry, self.audit_timeout).await;

        self.load(id).await
    }

    /// Owner hands a letter to review, optionally with hand-written text.
    pub async fn submit_for_review(
        &self,
        id: &LetterId,
        owner: &OwnerId,
        content: Option<&str>,
    ) -> Result<Letter, WorkflowError> {
        self.load_owned(id, owner).await?;
        self.apply(
            id,
            LetterStatus::PendingReview,
            AuditActor::Owner(owner.clone()),
            None,
            content.map(LetterContent::Draft),
        )
        .await
    }

    pub async fn start_review(&self, id: &LetterId, reviewer: &str) -> Result<Letter, WorkflowError> {
        self.transition(
            id,
            LetterStatus::UnderReview,
            AuditActor::Reviewer(reviewer.to_string()),
            None,
        )
        .await
    }

    /// Put a letter under review back in the queue.
    pub async fn return_to_queue(
        &self,
        id: &LetterId,
        reviewer: &str,
    ) -> Result<Letter, WorkflowError> {
        self.transition(
            id,
            LetterStatus::PendingReview,
            AuditActor::Reviewer(reviewer.to_string()),
            None,
        )
        .await
    }

    /// Approve, storing the reviewer's final text when given.
    pub async fn approve(
        &self,
        id: &LetterId,
        reviewer: &str,
        final_content: Option<&str>,
    ) -> Result<Letter, WorkflowError> {
        self.apply(
            id,
            LetterStatus::Approved,
            AuditActor::Reviewer(reviewer.to_string()),
            None,
            final_content.map(LetterContent::Final),
        )
        .await
    }

    pub async fn reject(
        &self,
        id: &LetterId,
        reviewer: &str,
        reason: &str,
    ) -> Result<Letter, WorkflowError> {
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingField("reason").into());
        }
        self.transition(
            id,
            LetterStatus::Rejected,
            AuditActor::Reviewer(reviewer.to_string()),
            Some(reason.to_string()),
        )
        .await
    }

    pub async fn complete(&self, id: &LetterId, actor: AuditActor) -> Result<Letter, WorkflowError> {
        self.transition(id, LetterStatus::Completed, actor, None).await
    }

    /// Owner sends a failed or rejected letter back to `draft`.
    pub async fn resubmit(&self, id: &LetterId, owner: &OwnerId) -> Result<Letter, WorkflowError> {
        self.load_owned(id, owner).await?;
        self.transition(
            id,
            LetterStatus::Draft,
            AuditActor::Owner(owner.clone()),
            None,
        )
        .await
    }

    async fn load(&self, id: &LetterId) -> Result<Letter, WorkflowError> {
        self.letters
            .load(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))
    }

    async fn load_owned(&self, id: &LetterId, owner: &OwnerId) -> Result<Letter, WorkflowError> {
        let letter = self.load(id).await?;
        if &letter.owner != owner {
            return Err(ValidationError::NotOwner {
                letter: id.clone(),
                owner: owner.clone(),
            }
            .into());
        }
        Ok(letter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::memory::InMemoryStore;
    use letterflow_core::AuditEvent;

    struct Fixture {
        store: Arc<InMemoryStore>,
        audit: Arc<MemoryAuditSink>,
        workflow: LetterWorkflow,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let workflow = LetterWorkflow::new(store.clone(), audit.clone());
        Fixture {
            store,
            audit,
            workflow,
        }
    }

    fn id() -> LetterId {
        LetterId::new("letter-1")
    }

    fn owner() -> OwnerId {
        OwnerId::new("owner-1")
    }

    #[tokio::test]
    async fn test_manual_review_cycle() {
        let f = fixture();
        f.workflow.create_draft(id(), owner(), "Deposit return").await.unwrap();

        let letter = f
            .workflow
            .submit_for_review(&id(), &owner(), Some("Dear landlord, ..."))
            .await
            .unwrap();
        assert_eq!(letter.status, LetterStatus::PendingReview);
        assert_eq!(letter.draft_content.as_deref(), Some("Dear landlord, ..."));

        f.workflow.start_review(&id(), "rev-1").await.unwrap();
        let letter = f
            .workflow
            .approve(&id(), "rev-1", Some("Dear Mr. Okafor, ..."))
            .await
            .unwrap();
        assert_eq!(letter.status, LetterStatus::Approved);
        assert_eq!(letter.final_content.as_deref(), Some("Dear Mr. Okafor, ..."));

        let letter = f.workflow.complete(&id(), AuditActor::System).await.unwrap();
        assert_eq!(letter.status, LetterStatus::Completed);

        let path: Vec<_> = f.audit.entries().iter().filter_map(|e| e.to).collect();
        assert_eq!(
            path,
            vec![
                LetterStatus::PendingReview,
                LetterStatus::UnderReview,
                LetterStatus::Approved,
                LetterStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_completed_is_terminal() {
        let f = fixture();
        let mut letter = Letter::new_draft(id(), owner(), "Done");
        letter.apply_status(LetterStatus::Completed);
        f.store.put_letter(letter);

        for to in LetterStatus::ALL {
            let result = f.workflow.transition(&id(), to, AuditActor::System, None).await;
            assert!(
                matches!(result, Err(WorkflowError::InvalidTransition(_))),
                "completed -> {} should fail",
                to
            );
        }
        assert!(f.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn test_reject_needs_reason_and_records_it() {
        let f = fixture();
        let mut letter = Letter::new_draft(id(), owner(), "Refund request");
        letter.apply_status(LetterStatus::PendingReview);
        f.store.put_letter(letter);

        assert!(matches!(
            f.workflow.reject(&id(), "rev-1", " ").await,
            Err(WorkflowError::Validation(ValidationError::MissingField("reason")))
        ));

        let letter = f
            .workflow
            .reject(&id(), "rev-1", "Missing account number")
            .await
            .unwrap();
        assert_eq!(letter.status, LetterStatus::Rejected);

        let entry = &f.audit.entries()[0];
        assert_eq!(entry.event, AuditEvent::StatusChanged);
        assert_eq!(entry.note.as_deref(), Some("Missing account number"));
        assert_eq!(entry.actor, AuditActor::Reviewer("rev-1".to_string()));

        let letter = f.workflow.resubmit(&id(), &owner()).await.unwrap();
        assert_eq!(letter.status, LetterStatus::Draft);
    }

    #[tokio::test]
    async fn test_return_to_queue() {
        let f = fixture();
        let mut letter = Letter::new_draft(id(), owner(), "Complaint");
        letter.apply_status(LetterStatus::UnderReview);
        f.store.put_letter(letter);

        let letter = f.workflow.return_to_queue(&id(), "rev-2").await.unwrap();
        assert_eq!(letter.status, LetterStatus::PendingReview);
    }

    #[tokio::test]
    async fn test_generating_is_off_limits() {
        let f = fixture();
        f.workflow.create_draft(id(), owner(), "Notice").await.unwrap();

        let result = f
            .workflow
            .transition(&id(), LetterStatus::Generating, AuditActor::Owner(owner()), None)
            .await;
        assert_eq!(
            result,
            Err(WorkflowError::GenerationOnly {
                from: LetterStatus::Draft,
                to: LetterStatus::Generating
            })
        );
        assert_eq!(f.store.letter(&id()).unwrap().status, LetterStatus::Draft);
    }

    #[tokio::test]
    async fn test_other_owner_cannot_submit() {
        let f = fixture();
        f.workflow.create_draft(id(), owner(), "Notice").await.unwrap();

        let result = f
            .workflow
            .submit_for_review(&id(), &OwnerId::new("intruder"), None)
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::Validation(ValidationError::NotOwner { .. }))
        ));
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_block() {
        let f = fixture();
        f.audit.set_failing(true);
        f.workflow.create_draft(id(), owner(), "Notice").await.unwrap();

        let letter = f.workflow.submit_for_review(&id(), &owner(), None).await.unwrap();
        assert_eq!(letter.status, LetterStatus::PendingReview);
        assert!(f.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn test_stale_submit_leaves_draft_text() {
        let f = fixture();
        let mut letter = Letter::new_draft(id(), owner(), "Notice");
        letter.draft_content = Some("Original text".to_string());
        letter.apply_status(LetterStatus::PendingReview);
        f.store.put_letter(letter);

        let result = f
            .workflow
            .submit_for_review(&id(), &owner(), Some("Replacement text"))
            .await;
        assert!(matches!(result, Err(WorkflowError::InvalidTransition(_))));
        assert_eq!(
            f.store.letter(&id()).unwrap().draft_content.as_deref(),
            Some("Original text")
        );
    }

    #[tokio::test]
    async fn test_approve_with_store_down_changes_nothing() {
        let f = fixture();
        let mut letter = Letter::new_draft(id(), owner(), "Notice");
        letter.apply_status(LetterStatus::UnderReview);
        f.store.put_letter(letter);

        let store = f.store.clone();
        let workflow = LetterWorkflow::new(
            Arc::new(FlakyWrites(store.clone())),
            f.audit.clone(),
        );
        let result = workflow.approve(&id(), "rev-1", Some("Final text")).await;
        assert!(matches!(result, Err(WorkflowError::Store(_))));

        let letter = store.letter(&id()).unwrap();
        assert_eq!(letter.status, LetterStatus::UnderReview);
        assert_eq!(letter.final_content, None);
        assert!(f.audit.entries().is_empty());
    }

    /// Reads succeed, every write fails.
    struct FlakyWrites(Arc<InMemoryStore>);

    #[async_trait::async_trait]
    impl LetterStore for FlakyWrites {
        async fn load(&self, id: &LetterId) -> Result<Option<Letter>, StoreError> {
            self.0.load(id).await
        }

        async fn insert(&self, _letter: Letter) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("primary down".to_string()))
        }

        async fn compare_and_set_status(
            &self,
            _id: &LetterId,
            _expected: LetterStatus,
            _next: LetterStatus,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("primary down".to_string()))
        }

        async fn compare_and_set_with_content(
            &self,
            _id: &LetterId,
            _expected: LetterStatus,
            _next: LetterStatus,
            _content: LetterContent<'_>,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("primary down".to_string()))
        }

        async fn list_stuck_generating(
            &self,
            started_before: chrono::DateTime<chrono::Utc>,
        ) -> Result<Vec<Letter>, StoreError> {
            self.0.list_stuck_generating(started_before).await
        }
    }

    #[tokio::test]
    async fn test_missing_letter() {
        let f = fixture();
        assert_eq!(
            f.workflow.start_review(&id(), "rev-1").await,
            Err(WorkflowError::NotFound(id()))
        );
    }
}
