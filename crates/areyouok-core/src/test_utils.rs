//! Shared test identities.

use crate::identity::{Identity, IDENTITY_LEN};

/// Deterministic identity whose bytes are all `seed`.
pub fn identity(seed: u8) -> Identity {
    Identity::from_bytes([seed; IDENTITY_LEN])
}

/// Owner in most tests.
pub fn alice() -> Identity {
    identity(0xA1)
}

/// Beneficiary in most tests.
pub fn bob() -> Identity {
    identity(0xB0)
}

/// An unrelated third party.
pub fn carol() -> Identity {
    identity(0xC4)
}
