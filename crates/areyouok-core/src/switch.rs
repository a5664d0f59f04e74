//! The custody state machine
//!
//! Pure logic: no I/O, no clock, no locking. Every operation takes the
//! authenticated caller and the current time from the host and either
//! returns the event it produced or an error, leaving `self` untouched on
//! error.
//!
//! # States
//!
//! There is no stored state tag. A switch is **Active** while
//! `now < last_check_in + check_in_interval` and **Expired** from that
//! instant on. A check-in by the owner moves an expired switch back to
//! Active as long as the beneficiary has not swept it.
//!
//! ```text
//!   create ──► Active ──(deadline passes)──► Expired ──withdraw──► Expired, balance 0
//!                ▲                              │
//!                └──────────check_in────────────┘
//! ```

use crate::amount::Amount;
use crate::clock::Timestamp;
use crate::events::SwitchEvent;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which role an operation requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Beneficiary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Beneficiary => write!(f, "beneficiary"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    #[error("Unauthorized: {caller} is not the {required} of this switch")]
    Unauthorized { caller: Identity, required: Role },

    #[error("Invalid beneficiary: {0}")]
    InvalidBeneficiary(Identity),

    #[error("Invalid owner: {0}")]
    InvalidOwner(Identity),

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Deposit of {amount} would overflow balance {balance}")]
    AmountOverflow { balance: Amount, amount: Amount },

    #[error("Switch has not expired: deadline {deadline}, {remaining} seconds remaining")]
    NotExpired { deadline: Timestamp, remaining: u64 },

    #[error("Insufficient balance: nothing to withdraw")]
    InsufficientBalance,
}

/// A consistent copy of every switch field.
///
/// This is also the persisted form; [`Switch::restore`] re-checks the
/// invariants when loading one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchSnapshot {
    pub owner: Identity,
    pub beneficiary: Identity,
    pub balance: Amount,
    pub last_check_in: Timestamp,
    pub check_in_interval: u64,
}

impl SwitchSnapshot {
    /// `last_check_in + check_in_interval`, saturating.
    pub fn deadline(&self) -> Timestamp {
        self.last_check_in.saturating_add(self.check_in_interval)
    }

    pub fn remaining_time(&self, now: Timestamp) -> u64 {
        self.deadline().saturating_sub(now)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.deadline()
    }
}

/// Custody state for one owner/beneficiary pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    owner: Identity,
    beneficiary: Identity,
    balance: Amount,
    last_check_in: Timestamp,
    check_in_interval: u64,
}

impl Switch {
    /// Create a switch owned by `owner`, checked in at `now`.
    pub fn create(
        owner: Identity,
        beneficiary: Identity,
        initial_deposit: Amount,
        now: Timestamp,
        check_in_interval: u64,
    ) -> Result<Self, SwitchError> {
        if owner.is_zero() {
            return Err(SwitchError::InvalidOwner(owner));
        }
        if beneficiary.is_zero() || beneficiary == owner {
            return Err(SwitchError::InvalidBeneficiary(beneficiary));
        }
        Ok(Self {
            owner,
            beneficiary,
            balance: initial_deposit,
            last_check_in: now,
            check_in_interval,
        })
    }

    /// Rebuild a switch from a stored snapshot.
    pub fn restore(snapshot: SwitchSnapshot) -> Result<Self, SwitchError> {
        if snapshot.owner.is_zero() {
            return Err(SwitchError::InvalidOwner(snapshot.owner));
        }
        if snapshot.beneficiary.is_zero() || snapshot.beneficiary == snapshot.owner {
            return Err(SwitchError::InvalidBeneficiary(snapshot.beneficiary));
        }
        Ok(Self {
            owner: snapshot.owner,
            beneficiary: snapshot.beneficiary,
            balance: snapshot.balance,
            last_check_in: snapshot.last_check_in,
            check_in_interval: snapshot.check_in_interval,
        })
    }

    pub fn snapshot(&self) -> SwitchSnapshot {
        SwitchSnapshot {
            owner: self.owner,
            beneficiary: self.beneficiary,
            balance: self.balance,
            last_check_in: self.last_check_in,
            check_in_interval: self.check_in_interval,
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Add value. Anyone may deposit, before or after expiry.
    pub fn deposit(&mut self, from: Identity, amount: Amount) -> Result<SwitchEvent, SwitchError> {
        if amount == 0 {
            return Err(SwitchError::InvalidAmount);
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(SwitchError::AmountOverflow {
                balance: self.balance,
                amount,
            })?;
        Ok(SwitchEvent::Deposited { from, amount })
    }

    /// Prove liveness. Resets the deadline even if it already passed.
    pub fn check_in(&mut self, caller: Identity, now: Timestamp) -> Result<SwitchEvent, SwitchError> {
        self.require(caller, Role::Owner)?;
        // Never move backwards if the host clock regressed.
        self.last_check_in = self.last_check_in.max(now);
        Ok(SwitchEvent::CheckedIn {
            owner: caller,
            timestamp: self.last_check_in,
        })
    }

    /// Sweep the whole balance to the beneficiary.
    ///
    /// Returns the swept amount; the host is responsible for actually
    /// dispatching it.
    pub fn withdraw(
        &mut self,
        caller: Identity,
        now: Timestamp,
    ) -> Result<(Amount, SwitchEvent), SwitchError> {
        self.require(caller, Role::Beneficiary)?;
        if !self.is_expired(now) {
            return Err(SwitchError::NotExpired {
                deadline: self.deadline(),
                remaining: self.remaining_time(now),
            });
        }
        if self.balance == 0 {
            return Err(SwitchError::InsufficientBalance);
        }
        let amount = std::mem::take(&mut self.balance);
        Ok((
            amount,
            SwitchEvent::Withdrawn {
                beneficiary: caller,
                amount,
            },
        ))
    }

    /// Replace the beneficiary. Allowed at any time, including after expiry.
    pub fn set_beneficiary(
        &mut self,
        caller: Identity,
        new_beneficiary: Identity,
    ) -> Result<SwitchEvent, SwitchError> {
        self.require(caller, Role::Owner)?;
        if new_beneficiary.is_zero() || new_beneficiary == self.owner {
            return Err(SwitchError::InvalidBeneficiary(new_beneficiary));
        }
        let old = std::mem::replace(&mut self.beneficiary, new_beneficiary);
        Ok(SwitchEvent::BeneficiaryChanged {
            old,
            new: new_beneficiary,
        })
    }

    /// Hand the switch to a new owner. The deadline clock keeps running.
    pub fn transfer_ownership(
        &mut self,
        caller: Identity,
        new_owner: Identity,
    ) -> Result<SwitchEvent, SwitchError> {
        self.require(caller, Role::Owner)?;
        if new_owner.is_zero() || new_owner == self.beneficiary {
            return Err(SwitchError::InvalidOwner(new_owner));
        }
        let old = std::mem::replace(&mut self.owner, new_owner);
        Ok(SwitchEvent::OwnershipTransferred {
            old,
            new: new_owner,
        })
    }

    fn require(&self, caller: Identity, role: Role) -> Result<(), SwitchError> {
        let holder = match role {
            Role::Owner => self.owner,
            Role::Beneficiary => self.beneficiary,
        };
        if caller == holder {
            Ok(())
        } else {
            Err(SwitchError::Unauthorized {
                caller,
                required: role,
            })
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn owner(&self) -> Identity {
        self.owner
    }

    pub fn beneficiary(&self) -> Identity {
        self.beneficiary
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn last_check_in(&self) -> Timestamp {
        self.last_check_in
    }

    pub fn check_in_interval(&self) -> u64 {
        self.check_in_interval
    }

    pub fn deadline(&self) -> Timestamp {
        self.last_check_in.saturating_add(self.check_in_interval)
    }

    /// Seconds until the deadline, zero once it has passed.
    pub fn remaining_time(&self, now: Timestamp) -> u64 {
        self.deadline().saturating_sub(now)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.deadline()
    }
}
