//! In-memory store for tests, demos and single-process deployments.
//!
//! One mutex per table makes each primitive atomic. A switchable outage
//! flag makes every call fail with `Unavailable`, for exercising the
//! fail-closed paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use letterflow_core::{AllowanceAccount, Letter, LetterId, LetterStatus, OwnerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ledger::{AllowanceStore, LedgerError};
use crate::letters::{LetterContent, LetterStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    letters: Mutex<HashMap<LetterId, Letter>>,
    accounts: Mutex<HashMap<OwnerId, AllowanceAccount>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an account.
    pub fn insert_account(&self, account: AllowanceAccount) {
        self.accounts.lock().insert(account.owner.clone(), account);
    }

    pub fn account(&self, owner: &OwnerId) -> Option<AllowanceAccount> {
        self.accounts.lock().get(owner).cloned()
    }

    pub fn letter(&self, id: &LetterId) -> Option<Letter> {
        self.letters.lock().get(id).cloned()
    }

    /// Overwrite a letter without any checks. Seeding and fixtures only.
    pub fn put_letter(&self, letter: Letter) {
        self.letters.lock().insert(letter.id.clone(), letter);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn is_down(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }

    fn letters_up(&self) -> Result<(), StoreError> {
        if self.is_down() {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }

    fn accounts_up(&self) -> Result<(), LedgerError> {
        if self.is_down() {
            return Err(LedgerError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }

    fn swap_status(
        &self,
        id: &LetterId,
        expected: LetterStatus,
        next: LetterStatus,
        content: Option<LetterContent<'_>>,
    ) -> Result<bool, StoreError> {
        self.letters_up()?;
        let mut letters = self.letters.lock();
        let letter = letters
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if letter.status != expected {
            return Ok(false);
        }
        if let Some(content) = content {
            content.write_to(letter);
        }
        letter.apply_status(next);
        Ok(true)
    }

    fn update_account<T>(
        &self,
        owner: &OwnerId,
        apply: impl FnOnce(&mut AllowanceAccount) -> T,
    ) -> Result<T, LedgerError> {
        self.accounts_up()?;
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(owner)
            .ok_or_else(|| LedgerError::AccountNotFound(owner.clone()))?;
        Ok(apply(account))
    }
}

#[async_trait]
impl AllowanceStore for InMemoryStore {
    async fn load_account(&self, owner: &OwnerId) -> Result<Option<AllowanceAccount>, LedgerError> {
        self.accounts_up()?;
        Ok(self.account(owner))
    }

    async fn decrement_if_positive(&self, owner: &OwnerId) -> Result<bool, LedgerError> {
        self.update_account(owner, |account| account.try_deduct())
    }

    async fn increment(&self, owner: &OwnerId, amount: u32) -> Result<(), LedgerError> {
        self.update_account(owner, |account| account.credit(amount))
    }

    async fn increment_lifetime_generations(&self, owner: &OwnerId) -> Result<u64, LedgerError> {
        self.update_account(owner, |account| account.record_generation())
    }
}

#[async_trait]
impl LetterStore for InMemoryStore {
    async fn load(&self, id: &LetterId) -> Result<Option<Letter>, StoreError> {
        self.letters_up()?;
        Ok(self.letter(id))
    }

    async fn insert(&self, letter: Letter) -> Result<(), StoreError> {
        self.letters_up()?;
        let mut letters = self.letters.lock();
        if letters.contains_key(&letter.id) {
            return Err(StoreError::AlreadyExists(letter.id));
        }
        letters.insert(letter.id.clone(), letter);
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: &LetterId,
        expected: LetterStatus,
        next: LetterStatus,
    ) -> Result<bool, StoreError> {
        self.swap_status(id, expected, next, None)
    }

    async fn compare_and_set_with_content(
        &self,
        id: &LetterId,
        expected: LetterStatus,
        next: LetterStatus,
        content: LetterContent<'_>,
    ) -> Result<bool, StoreError> {
        self.swap_status(id, expected, next, Some(content))
    }

    async fn list_stuck_generating(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<Letter>, StoreError> {
        self.letters_up()?;
        let mut stuck: Vec<Letter> = self
            .letters
            .lock()
            .values()
            .filter(|letter| {
                letter.status == LetterStatus::Generating
                    && letter
                        .generation_started_at
                        .is_some_and(|started| started < started_before)
            })
            .cloned()
            .collect();
        stuck.sort_by_key(|letter| letter.generation_started_at);
        Ok(stuck)
    }
}
