//! Peer-to-peer asset marketplace ledger
//!
//! Users list non-fungible tokens for sale at a fixed price, buyers
//! purchase them for exactly the quoted amount, and the operator collects
//! a flat listing fee that becomes withdrawable revenue only when a sale
//! completes. The crate provides the listing/escrow engine: deterministic
//! listing identity, the listing lifecycle (create, edit, cancel, lazy
//! expiry, sale), pending-vs-realized fee accounting, and the factory
//! that mints new asset collections the marketplace can trade.
//!
//! All state lives in a single owned [`Marketplace`]; operations run
//! serially against `&mut self` and either commit fully or leave no trace.

pub mod asset;
pub mod clock;
pub mod collection;
pub mod engine;
pub mod error;
pub mod events;
pub mod fees;
pub mod identity;
pub mod registry;
pub mod repository;
pub mod types;

pub use asset::AssetCollection;
pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::{derive_collection_address, CollectionRecord, MintedCollection};
pub use engine::{MarketConfig, Marketplace};
pub use error::{AssetError, MarketplaceError};
pub use events::MarketEvent;
pub use fees::FeeLedger;
pub use identity::derive_listing_id;
pub use registry::{Listing, ListingRegistry};
pub use repository::{persist, restore, MarketRepository, SqliteMarketRepository};
pub use types::{Address, ListingId, Payment, LISTING_FEE, LISTING_TTL_DAYS};
