//! Listing records and the authoritative listing registry
//!
//! The registry maps derived listing ids to records and maintains the
//! secondary views (active set, by seller, by collection). Indexes track
//! active listings only and are adjusted on every transition so they can
//! never disagree with the records.

use crate::types::{Address, ListingId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One offer to sell a specific token at a fixed price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub seller: Address,
    pub collection: Address,
    pub token_id: u64,
    pub price: u64,
    /// Fee booked as pending for the current listing cycle
    pub fee_paid: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Whether the listing has outlived its TTL at `now`. Expiry never
    /// mutates state; it is checked at purchase time only.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl_days: i64) -> bool {
        now > self.updated_at + Duration::days(ttl_days)
    }
}

/// Authoritative listing store plus active-set indexes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingRegistry {
    listings: BTreeMap<ListingId, Listing>,
    active: BTreeSet<ListingId>,
    by_seller: BTreeMap<Address, BTreeSet<ListingId>>,
    by_collection: BTreeMap<Address, BTreeSet<ListingId>>,
}

impl ListingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ListingId) -> Option<&Listing> {
        self.listings.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ListingId) -> Option<&mut Listing> {
        self.listings.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// Iterate every record, active or not (persistence walks this)
    pub fn iter(&self) -> impl Iterator<Item = &Listing> {
        self.listings.values()
    }

    /// Insert a listing as active, replacing any record under the same id
    ///
    /// Returns the previous record. Index entries for a superseded seller
    /// are dropped before the new ones are added, so an id appears at most
    /// once per index.
    pub(crate) fn upsert_active(&mut self, listing: Listing) -> Option<Listing> {
        let id = listing.id;
        let previous = self.listings.insert(id, listing.clone());
        if let Some(prev) = &previous {
            if prev.active && prev.seller != listing.seller {
                self.unindex_seller(prev.seller, &id);
            }
        }
        self.active.insert(id);
        self.by_seller.entry(listing.seller).or_default().insert(id);
        self.by_collection
            .entry(listing.collection)
            .or_default()
            .insert(id);
        previous
    }

    /// Mark a listing inactive and drop it from the active indexes
    pub(crate) fn deactivate(&mut self, id: &ListingId) {
        let Some(listing) = self.listings.get_mut(id) else {
            return;
        };
        listing.active = false;
        let seller = listing.seller;
        let collection = listing.collection;
        self.active.remove(id);
        self.unindex_seller(seller, id);
        if let Some(set) = self.by_collection.get_mut(&collection) {
            set.remove(id);
            if set.is_empty() {
                self.by_collection.remove(&collection);
            }
        }
    }

    /// Undo a [`deactivate`](Self::deactivate) after a failed external call
    pub(crate) fn reactivate(&mut self, id: &ListingId) {
        let Some(listing) = self.listings.get_mut(id) else {
            return;
        };
        listing.active = true;
        let seller = listing.seller;
        let collection = listing.collection;
        self.active.insert(*id);
        self.by_seller.entry(seller).or_default().insert(*id);
        self.by_collection.entry(collection).or_default().insert(*id);
    }

    /// Restore a persisted record, rebuilding indexes for active entries
    pub(crate) fn restore(&mut self, listing: Listing) {
        let id = listing.id;
        let active = listing.active;
        let seller = listing.seller;
        let collection = listing.collection;
        self.listings.insert(id, listing);
        if active {
            self.active.insert(id);
            self.by_seller.entry(seller).or_default().insert(id);
            self.by_collection.entry(collection).or_default().insert(id);
        }
    }

    pub fn active_listings(&self) -> Vec<&Listing> {
        self.active
            .iter()
            .filter_map(|id| self.listings.get(id))
            .collect()
    }

    pub fn active_by_seller(&self, seller: Address) -> Vec<&Listing> {
        self.by_seller
            .get(&seller)
            .into_iter()
            .flatten()
            .filter_map(|id| self.listings.get(id))
            .collect()
    }

    pub fn active_by_collection(&self, collection: Address) -> Vec<&Listing> {
        self.by_collection
            .get(&collection)
            .into_iter()
            .flatten()
            .filter_map(|id| self.listings.get(id))
            .collect()
    }

    fn unindex_seller(&mut self, seller: Address, id: &ListingId) {
        if let Some(set) = self.by_seller.get_mut(&seller) {
            set.remove(id);
            if set.is_empty() {
                self.by_seller.remove(&seller);
            }
        }
    }
}
