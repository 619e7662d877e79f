//! Collection factory records and the factory-minted asset collection
//!
//! The factory gives the marketplace asset classes it can always trade:
//! each [`MintedCollection`] is an independent token store supporting
//! mint-with-URI, per-owner operator approval and owner-checked transfer.
//! The metadata [`CollectionRecord`] is what the marketplace registry
//! remembers about a collection; it is immutable once created.

use crate::asset::AssetCollection;
use crate::error::AssetError;
use crate::types::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Metadata recorded for every collection the factory has created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub creator: Address,
    pub created_at: DateTime<Utc>,
}

/// Derive the address of a new collection.
///
/// First 20 bytes of SHA-256 over a domain tag, the creator address, the
/// factory nonce (8 big-endian bytes) and the name/symbol bytes. The
/// nonce makes repeated creations with identical metadata yield distinct
/// addresses.
pub fn derive_collection_address(creator: Address, nonce: u64, name: &str, symbol: &str) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(b"marketplace.collection");
    hasher.update(creator.as_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(name.as_bytes());
    hasher.update(symbol.as_bytes());
    let digest = hasher.finalize();
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[..20]);
    Address(addr)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TokenRecord {
    owner: Address,
    uri: String,
}

/// A token collection instantiated by the factory
///
/// Token ids are sequential starting at 1. The `market` address is the
/// identity the owning marketplace presents when it transfers tokens;
/// owners authorize it with [`MintedCollection::set_approval_for_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintedCollection {
    address: Address,
    market: Address,
    next_token_id: u64,
    tokens: BTreeMap<u64, TokenRecord>,
    approvals: BTreeMap<Address, BTreeSet<Address>>,
}

impl MintedCollection {
    pub fn new(address: Address, market: Address) -> Self {
        Self {
            address,
            market,
            next_token_id: 1,
            tokens: BTreeMap::new(),
            approvals: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Mint a new token to `to` and return its id
    pub fn mint(&mut self, to: Address, uri: impl Into<String>) -> u64 {
        let token_id = self.next_token_id;
        self.next_token_id += 1;
        self.tokens.insert(
            token_id,
            TokenRecord {
                owner: to,
                uri: uri.into(),
            },
        );
        token_id
    }

    /// Grant or revoke `operator`'s right to transfer any of `owner`'s
    /// tokens in this collection
    pub fn set_approval_for_all(&mut self, owner: Address, operator: Address, approved: bool) {
        let operators = self.approvals.entry(owner).or_default();
        if approved {
            operators.insert(operator);
        } else {
            operators.remove(&operator);
        }
    }

    pub fn token_uri(&self, token_id: u64) -> Option<&str> {
        self.tokens.get(&token_id).map(|t| t.uri.as_str())
    }
}

impl AssetCollection for MintedCollection {
    fn owner_of(&self, token_id: u64) -> Option<Address> {
        self.tokens.get(&token_id).map(|t| t.owner)
    }

    fn is_approved_for_transfer(&self, owner: Address, operator: Address, token_id: u64) -> bool {
        match self.tokens.get(&token_id) {
            Some(token) if token.owner == owner => self
                .approvals
                .get(&owner)
                .is_some_and(|ops| ops.contains(&operator)),
            _ => false,
        }
    }

    fn transfer_from(
        &mut self,
        from: Address,
        to: Address,
        token_id: u64,
    ) -> Result<(), AssetError> {
        let authorized = self.is_approved_for_transfer(from, self.market, token_id);
        let token = self
            .tokens
            .get_mut(&token_id)
            .ok_or(AssetError::UnknownToken)?;
        if token.owner != from {
            return Err(AssetError::NotTokenOwner);
        }
        if !authorized {
            return Err(AssetError::TransferNotAuthorized);
        }
        token.owner = to;
        Ok(())
    }
}
