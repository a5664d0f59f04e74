//! Event records emitted by switch and registry operations
//!
//! Every successful mutation produces exactly one record (creation with an
//! initial deposit produces two). External layers follow the journal to
//! refresh their views.

use crate::amount::Amount;
use crate::clock::Timestamp;
use crate::identity::{Identity, SwitchId};
use serde::{Deserialize, Serialize};

/// What happened to a switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchEvent {
    /// The registry created a new switch
    SwitchCreated {
        switch_id: SwitchId,
        owner: Identity,
        beneficiary: Identity,
        timestamp: Timestamp,
    },

    /// The owner proved liveness
    CheckedIn { owner: Identity, timestamp: Timestamp },

    /// Value was added by any caller
    Deposited { from: Identity, amount: Amount },

    /// The beneficiary swept the whole balance
    Withdrawn { beneficiary: Identity, amount: Amount },

    BeneficiaryChanged { old: Identity, new: Identity },

    OwnershipTransferred { old: Identity, new: Identity },
}

impl SwitchEvent {
    /// Stable short name, used as a storage discriminator and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SwitchEvent::SwitchCreated { .. } => "switch_created",
            SwitchEvent::CheckedIn { .. } => "checked_in",
            SwitchEvent::Deposited { .. } => "deposited",
            SwitchEvent::Withdrawn { .. } => "withdrawn",
            SwitchEvent::BeneficiaryChanged { .. } => "beneficiary_changed",
            SwitchEvent::OwnershipTransferred { .. } => "ownership_transferred",
        }
    }
}

/// A journaled event with its position and the switch it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the journal, starting at 1
    pub seq: u64,
    pub switch_id: SwitchId,
    /// When the operation ran
    pub timestamp: Timestamp,
    pub event: SwitchEvent,
}
