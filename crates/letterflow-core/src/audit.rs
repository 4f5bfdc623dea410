//! Audit trail entries.
//!
//! Every status change and every credit movement produced by the runtime is
//! described by an [`AuditEntry`]. Sinks that persist them live in the
//! runtime crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::letter::{LetterId, LetterStatus, OwnerId};

/// Who caused the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AuditActor {
    /// The orchestrator or a recovery sweep
    System,
    Owner(OwnerId),
    Reviewer(String),
}

impl fmt::Display for AuditActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditActor::System => write!(f, "system"),
            AuditActor::Owner(owner) => write!(f, "owner:{}", owner),
            AuditActor::Reviewer(reviewer) => write!(f, "reviewer:{}", reviewer),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    StatusChanged,
    GenerationSucceeded,
    GenerationFailed,
    CreditRefunded,
    StaleGenerationRecovered,
}

/// A single append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub letter_id: LetterId,
    pub owner: OwnerId,
    pub event: AuditEvent,
    pub actor: AuditActor,

    #[serde(default)]
    pub from: Option<LetterStatus>,

    #[serde(default)]
    pub to: Option<LetterStatus>,

    /// Free-form detail, e.g. the failure reason
    #[serde(default)]
    pub note: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Entry for a status change.
    pub fn transition(
        letter_id: LetterId,
        owner: OwnerId,
        from: LetterStatus,
        to: LetterStatus,
        actor: AuditActor,
    ) -> Self {
        Self {
            letter_id,
            owner,
            event: AuditEvent::StatusChanged,
            actor,
            from: Some(from),
            to: Some(to),
            note: None,
            recorded_at: Utc::now(),
        }
    }

    /// Entry for an event that is not itself a status change.
    pub fn event(letter_id: LetterId, owner: OwnerId, event: AuditEvent) -> Self {
        Self {
            letter_id,
            owner,
            event,
            actor: AuditActor::System,
            from: None,
            to: None,
            note: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_event(mut self, event: AuditEvent) -> Self {
        self.event = event;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_entry() {
        let entry = AuditEntry::transition(
            LetterId::new("l1"),
            OwnerId::new("o1"),
            LetterStatus::Generating,
            LetterStatus::Failed,
            AuditActor::System,
        )
        .with_event(AuditEvent::GenerationFailed)
        .with_note("rate limited");

        assert_eq!(entry.from, Some(LetterStatus::Generating));
        assert_eq!(entry.to, Some(LetterStatus::Failed));
        assert_eq!(entry.event, AuditEvent::GenerationFailed);
        assert_eq!(entry.note.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_actor_serialization() {
        let json = serde_json::to_value(AuditActor::Reviewer("rev-7".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "reviewer", "id": "rev-7"}));

        let json = serde_json::to_value(AuditActor::System).unwrap();
        assert_eq!(json, serde_json::json!({"type": "system"}));
    }
}
