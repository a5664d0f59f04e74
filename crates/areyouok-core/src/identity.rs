//! Principal and switch identities
//!
//! Both are opaque 20-byte values written as `0x`-prefixed hex. Parsing is
//! case-insensitive and the prefix is optional; display is always lowercase
//! with the prefix, so two spellings of the same address compare equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of an identity in bytes.
pub const IDENTITY_LEN: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Expected {expected} hex digits, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}

fn parse_bytes(s: &str) -> Result<[u8; IDENTITY_LEN], IdentityError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.len() != IDENTITY_LEN * 2 {
        return Err(IdentityError::InvalidLength {
            expected: IDENTITY_LEN * 2,
            got: digits.len(),
        });
    }
    let mut bytes = [0u8; IDENTITY_LEN];
    hex::decode_to_slice(digits, &mut bytes)
        .map_err(|e| IdentityError::InvalidHex(e.to_string()))?;
    Ok(bytes)
}

/// Defines a 20-byte handle type with hex `Display`/`FromStr` and string serde.
macro_rules! hex_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; IDENTITY_LEN]);

        impl $name {
            /// The all-zero value.
            pub const ZERO: Self = Self([0u8; IDENTITY_LEN]);

            pub const fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; IDENTITY_LEN]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = IdentityError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_bytes(s.trim()).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_handle!(
    /// An authenticated principal (owner, beneficiary or depositor).
    ///
    /// The core never verifies identities; the host passes in the caller it
    /// has already authenticated.
    Identity
);

hex_handle!(
    /// Handle of a switch instance, assigned by the registry.
    SwitchId
);
