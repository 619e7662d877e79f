//! Error taxonomy for marketplace operations
//!
//! Every variant is a synchronous, caller-visible rejection of the whole
//! operation. A failed call leaves state exactly as it was; nothing is
//! retried or deferred inside the engine.

use crate::types::ListingId;
use thiserror::Error;

/// Errors returned by the marketplace engine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarketplaceError {
    #[error("price must be more than 0")]
    InvalidPrice,

    #[error("listing fee must be paid exactly: expected {expected}, paid {paid}")]
    InsufficientFee { expected: u64, paid: u64 },

    #[error("collection does not support the asset interface")]
    UnsupportedAsset,

    #[error("marketplace is not approved to transfer this token")]
    NotApproved,

    #[error("only the seller may modify a listing")]
    NotOwner,

    #[error("listing is not active")]
    NotActive,

    #[error("listing is already cancelled")]
    AlreadyCancelled,

    #[error("listing has expired")]
    Expired,

    #[error("payment must equal the price: expected {expected}, paid {paid}")]
    WrongPayment { expected: u64, paid: u64 },

    #[error("asset transfer failed")]
    TransferFailed,

    #[error("name and symbol are mandatory")]
    InvalidMetadata,

    #[error("caller is not the operator")]
    Unauthorized,

    #[error("listing not found: {0}")]
    ListingNotFound(ListingId),

    #[error("fee ledger underflow")]
    LedgerUnderflow,
}

/// Errors surfaced by an asset collection when the engine exercises the
/// asset-capability interface
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("token does not exist")]
    UnknownToken,

    #[error("sender does not own the token")]
    NotTokenOwner,

    #[error("caller is not authorized to transfer the token")]
    TransferNotAuthorized,
}
