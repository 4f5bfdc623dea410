//! Allowance ledger.
//!
//! The ledger is the only place credits move. Every mutation is a single
//! atomic store primitive, so concurrent requests from one owner (in this
//! process or any other) cannot both spend the last credit. Store failures
//! propagate as errors and callers treat them as a denial.

use async_trait::async_trait;
use letterflow_core::{AllowanceAccount, AllowanceCheck, OwnerId, ValidationError};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the allowance ledger.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Allowance store unavailable: {0}")]
    Unavailable(String),

    #[error("No allowance account for owner {0}")]
    AccountNotFound(OwnerId),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Backing store for allowance accounts.
///
/// Implementations must make each mutation atomic against the store itself,
/// not against in-process locks: several instances share one store.
#[async_trait]
pub trait AllowanceStore: Send + Sync {
    async fn load_account(&self, owner: &OwnerId) -> Result<Option<AllowanceAccount>, LedgerError>;

    /// Decrement by one iff the balance is positive.
    ///
    /// Unlimited accounts succeed without changing. `Ok(false)` means the
    /// balance was zero.
    async fn decrement_if_positive(&self, owner: &OwnerId) -> Result<bool, LedgerError>;

    /// Add `amount` credits. Unlimited accounts are left as they are.
    async fn increment(&self, owner: &OwnerId, amount: u32) -> Result<(), LedgerError>;

    /// Bump the lifetime generation counter, returning the new value.
    async fn increment_lifetime_generations(&self, owner: &OwnerId) -> Result<u64, LedgerError>;
}

/// Credit accounting over an [`AllowanceStore`].
#[derive(Clone)]
pub struct AllowanceLedger {
    store: Arc<dyn AllowanceStore>,
}

impl std::fmt::Debug for AllowanceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowanceLedger").finish_non_exhaustive()
    }
}

impl AllowanceLedger {
    pub fn new(store: Arc<dyn AllowanceStore>) -> Self {
        Self { store }
    }

    /// Read-only eligibility probe. Owners without an account are denied.
    pub async fn check_and_reserve(&self, owner: &OwnerId) -> Result<AllowanceCheck, LedgerError> {
        match self.store.load_account(owner).await {
            Ok(Some(account)) => Ok(account.check()),
            Ok(None) => Ok(AllowanceCheck::denied()),
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "Allowance check failed, denying");
                Err(e)
            }
        }
    }

    /// Spend one credit. `false` when the balance is exhausted.
    pub async fn deduct(&self, owner: &OwnerId) -> Result<bool, LedgerError> {
        let deducted = self.store.decrement_if_positive(owner).await.map_err(|e| {
            tracing::warn!(owner = %owner, error = %e, "Allowance deduction failed, denying");
            e
        })?;

        if deducted {
            tracing::debug!(owner = %owner, "Deducted one credit");
        }
        Ok(deducted)
    }

    /// Return credits taken by [`deduct`](Self::deduct).
    pub async fn refund(&self, owner: &OwnerId, amount: u32) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        self.store.increment(owner, amount).await?;
        tracing::debug!(owner = %owner, amount, "Refunded credits");
        Ok(())
    }

    /// Add purchased or renewed credits.
    pub async fn grant(&self, owner: &OwnerId, amount: u32) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        self.store.increment(owner, amount).await?;
        tracing::info!(owner = %owner, amount, "Granted credits");
        Ok(())
    }

    /// Count a successful generation against the owner's lifetime total.
    pub async fn record_generation(&self, owner: &OwnerId) -> Result<u64, LedgerError> {
        self.store.increment_lifetime_generations(owner).await
    }

    pub async fn account(&self, owner: &OwnerId) -> Result<Option<AllowanceAccount>, LedgerError> {
        self.store.load_account(owner).await
    }
}
