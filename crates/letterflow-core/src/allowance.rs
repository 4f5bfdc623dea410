//! Allowance account arithmetic.
//!
//! Stores hold [`AllowanceAccount`] values and apply these methods inside
//! their own atomic section, so the arithmetic lives in one place no matter
//! which backend owns the row.

use serde::{Deserialize, Serialize};

use crate::letter::OwnerId;

/// Per-owner generation credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceAccount {
    pub owner: OwnerId,

    /// Credits left; unsigned, so it can never go below zero
    pub credits_remaining: u32,

    /// Unlimited plans skip the balance entirely
    #[serde(default)]
    pub is_unlimited: bool,

    /// Successful generations over the account's lifetime.
    ///
    /// Independent of billing: used as an abuse signal.
    #[serde(default)]
    pub lifetime_generations: u64,
}

/// Result of an eligibility probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceCheck {
    pub allowed: bool,
    pub remaining: u32,
    pub is_unlimited: bool,
}

impl AllowanceCheck {
    /// The answer for an owner with no account at all.
    pub fn denied() -> Self {
        Self {
            allowed: false,
            remaining: 0,
            is_unlimited: false,
        }
    }
}

impl AllowanceAccount {
    /// Create a metered account with `credits` available.
    pub fn new(owner: OwnerId, credits: u32) -> Self {
        Self {
            owner,
            credits_remaining: credits,
            is_unlimited: false,
            lifetime_generations: 0,
        }
    }

    /// Create an unlimited account.
    pub fn unlimited(owner: OwnerId) -> Self {
        Self {
            owner,
            credits_remaining: 0,
            is_unlimited: true,
            lifetime_generations: 0,
        }
    }

    /// Read-only eligibility probe.
    pub fn check(&self) -> AllowanceCheck {
        AllowanceCheck {
            allowed: self.is_unlimited || self.credits_remaining > 0,
            remaining: self.credits_remaining,
            is_unlimited: self.is_unlimited,
        }
    }

    /// Decrement by one if positive. Unlimited accounts always succeed
    /// without changing the balance.
    pub fn try_deduct(&mut self) -> bool {
        if self.is_unlimited {
            return true;
        }
        match self.credits_remaining.checked_sub(1) {
            Some(left) => {
                self.credits_remaining = left;
                true
            }
            None => false,
        }
    }

    /// Add credits back (refund) or on top (grant). No-op when unlimited.
    pub fn credit(&mut self, amount: u32) {
        if !self.is_unlimited {
            self.credits_remaining = self.credits_remaining.saturating_add(amount);
        }
    }

    /// Bump the lifetime generation counter and return the new value.
    pub fn record_generation(&mut self) -> u64 {
        self.lifetime_generations = self.lifetime_generations.saturating_add(1);
        self.lifetime_generations
    }
}
