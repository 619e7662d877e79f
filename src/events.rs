//! Notifications emitted by the marketplace engine
//!
//! Fire-and-forget signals for external observers, emitted exactly once
//! per successful triggering operation and buffered in order until the
//! embedder drains them. They are not part of the atomic-commit boundary.

use crate::types::{Address, ListingId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event emitted by a successful marketplace operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// A listing was created for a token not previously on the market
    ListingAdded {
        listing_id: ListingId,
        seller: Address,
        price: u64,
        timestamp: DateTime<Utc>,
    },

    /// An existing record was re-listed or had its price edited
    ListingUpdated {
        listing_id: ListingId,
        seller: Address,
        price: u64,
        timestamp: DateTime<Utc>,
    },

    /// The seller withdrew the listing; the booked fee went back to them
    ListingCancelled {
        listing_id: ListingId,
        seller: Address,
        timestamp: DateTime<Utc>,
    },

    /// A sale completed at exactly the listed price
    ListingSold {
        listing_id: ListingId,
        buyer: Address,
        price: u64,
        timestamp: DateTime<Utc>,
    },

    /// The factory instantiated a new collection
    CollectionCreated {
        address: Address,
        creator: Address,
        timestamp: DateTime<Utc>,
    },

    /// The operator drained the realized fee balance
    FeesWithdrawn {
        operator: Address,
        amount: u64,
        timestamp: DateTime<Utc>,
    },
}
