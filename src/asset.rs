//! Asset-capability interface consumed by the listing engine
//!
//! The engine does not own token semantics. It requires only that a
//! collection can answer who owns a token, whether the marketplace has
//! been approved to move it, and that it can move it atomically. The
//! factory-minted [`crate::collection::MintedCollection`] implements this
//! trait; external collections are attached through
//! [`crate::engine::Marketplace::attach_collection`].

use crate::error::AssetError;
use crate::types::Address;

/// One addressable class of non-fungible tokens
pub trait AssetCollection {
    /// Whether this collection conforms to the asset interface the
    /// marketplace requires. Non-conforming collections are rejected at
    /// listing time.
    fn supports_asset_interface(&self) -> bool {
        true
    }

    /// Current owner of `token_id`, or `None` if the token does not exist
    fn owner_of(&self, token_id: u64) -> Option<Address>;

    /// Whether `operator` may transfer `token_id` on behalf of `owner`
    fn is_approved_for_transfer(&self, owner: Address, operator: Address, token_id: u64) -> bool;

    /// Move `token_id` from `from` to `to`. Fails without side effects if
    /// the token does not exist, `from` does not own it, or the transfer
    /// is unauthorized.
    fn transfer_from(&mut self, from: Address, to: Address, token_id: u64)
        -> Result<(), AssetError>;
}
