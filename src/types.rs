//! Core types for the marketplace

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Flat fee charged when a listing is created or re-listed, in native
/// value units. Escrowed as pending until the listing sells or is
/// cancelled.
pub const LISTING_FEE: u64 = 100;

/// Days an active listing stays purchasable after its last update.
/// Expiry is evaluated lazily at buy time, never eagerly.
pub const LISTING_TTL_DAYS: i64 = 60;

/// Error parsing an [`Address`] or [`ListingId`] from text
#[derive(Debug, Error, PartialEq)]
pub enum ParseIdError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("wrong length: expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// A 160-bit account or collection address
///
/// Displays and serializes as a lowercase `0x`-prefixed hex string, so it
/// is usable as a JSON map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseIdError> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| ParseIdError::WrongLength {
            expected: 20,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(hex_part)?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Deterministic 256-bit listing identifier
///
/// Derived from `(collection, token_id)` by [`crate::identity::derive_listing_id`];
/// any caller who knows the pair can compute it. Displays and serializes
/// as a lowercase `0x`-prefixed hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListingId(pub [u8; 32]);

impl ListingId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseIdError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| ParseIdError::WrongLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for ListingId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(hex_part)?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for ListingId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ListingId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// An outgoing value transfer the embedder must execute
///
/// The engine never pushes value itself; refunds, sale proceeds and fee
/// withdrawals are all returned as `Payment`s from the operation that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub to: Address,
    pub amount: u64,
}

impl Payment {
    pub fn new(to: Address, amount: u64) -> Self {
        Self { to, amount }
    }
}
