//! The marketplace engine
//!
//! [`Marketplace`] owns the whole durable state: the listing registry,
//! the fee ledger, the collection records, and the factory-minted token
//! stores. Every public operation runs to completion against `&mut self`,
//! which is the serialization guarantee the invariants rely on: no two
//! operations can interleave, and a failed operation leaves state exactly
//! as it found it.
//!
//! Attached value comes in as a `payment` argument; outgoing value leaves
//! as a [`Payment`] the embedder executes. The engine keeps its held
//! balance equal to `pending + realized` fees at all times.

use crate::asset::AssetCollection;
use crate::clock::{Clock, SystemClock};
use crate::collection::{derive_collection_address, CollectionRecord, MintedCollection};
use crate::error::{AssetError, MarketplaceError};
use crate::events::MarketEvent;
use crate::fees::FeeLedger;
use crate::identity::derive_listing_id;
use crate::registry::{Listing, ListingRegistry};
use crate::types::{Address, ListingId, Payment, LISTING_FEE, LISTING_TTL_DAYS};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Static configuration of a marketplace instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketConfig {
    /// The single privileged identity allowed to read and withdraw fees
    pub operator: Address,
    /// The identity the marketplace presents to asset collections; token
    /// owners approve this address as their transfer operator
    pub address: Address,
    /// Flat fee escrowed per listing, in native value units
    pub listing_fee: u64,
    /// Days before an un-bought active listing counts as expired
    pub ttl_days: i64,
}

impl MarketConfig {
    pub fn new(operator: Address, address: Address) -> Self {
        Self {
            operator,
            address,
            listing_fee: LISTING_FEE,
            ttl_days: LISTING_TTL_DAYS,
        }
    }
}

/// The marketplace listing/escrow engine
pub struct Marketplace {
    config: MarketConfig,
    registry: ListingRegistry,
    fees: FeeLedger,
    collections: BTreeMap<Address, CollectionRecord>,
    minted: BTreeMap<Address, MintedCollection>,
    external: HashMap<Address, Box<dyn AssetCollection>>,
    collections_created: u64,
    held_balance: u64,
    events: Vec<MarketEvent>,
    clock: Box<dyn Clock>,
}

impl Marketplace {
    pub fn new(config: MarketConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_clock(config: MarketConfig, clock: impl Clock + 'static) -> Self {
        Self {
            config,
            registry: ListingRegistry::new(),
            fees: FeeLedger::new(),
            collections: BTreeMap::new(),
            minted: BTreeMap::new(),
            external: HashMap::new(),
            collections_created: 0,
            held_balance: 0,
            events: Vec::new(),
            clock: Box::new(clock),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    // ---- listing lifecycle ----

    /// List `(collection, token_id)` for sale at `price`, paying the
    /// listing fee.
    ///
    /// Re-listing a token that already has a record updates it in place;
    /// identity is a pure function of the pair, so duplicates cannot
    /// exist. If the existing record is still active its booked fee is
    /// forfeited to the realized balance before the new fee is booked.
    pub fn list(
        &mut self,
        caller: Address,
        collection: Address,
        token_id: u64,
        price: u64,
        payment: u64,
    ) -> Result<ListingId, MarketplaceError> {
        if price == 0 {
            return Err(MarketplaceError::InvalidPrice);
        }
        let fee = self.config.listing_fee;
        if payment != fee {
            return Err(MarketplaceError::InsufficientFee {
                expected: fee,
                paid: payment,
            });
        }

        let market = self.config.address;
        let asset = self
            .asset(collection)
            .ok_or(MarketplaceError::UnsupportedAsset)?;
        if !asset.supports_asset_interface() {
            return Err(MarketplaceError::UnsupportedAsset);
        }
        match asset.owner_of(token_id) {
            Some(owner) if owner == caller => {}
            _ => return Err(MarketplaceError::NotApproved),
        }
        if !asset.is_approved_for_transfer(caller, market, token_id) {
            return Err(MarketplaceError::NotApproved);
        }

        let id = derive_listing_id(collection, token_id);
        let now = self.clock.now();
        let previous = self.registry.get(&id);
        let created_at = previous.map(|l| l.created_at).unwrap_or(now);
        let superseded_fee = previous.filter(|l| l.active).map(|l| l.fee_paid);

        // A still-active booking being overwritten ends its cycle without
        // a sale or cancel; its fee is forfeited to the realized balance.
        if let Some(old_fee) = superseded_fee {
            self.fees.realize(old_fee)?;
        }

        let listing = Listing {
            id,
            seller: caller,
            collection,
            token_id,
            price,
            fee_paid: payment,
            active: true,
            created_at,
            updated_at: now,
        };
        let is_new = self.registry.upsert_active(listing).is_none();
        self.fees.book(payment);
        self.held_balance += payment;

        info!(listing_id = %id, seller = %caller, price, "listing added");
        self.events.push(if is_new {
            MarketEvent::ListingAdded {
                listing_id: id,
                seller: caller,
                price,
                timestamp: now,
            }
        } else {
            MarketEvent::ListingUpdated {
                listing_id: id,
                seller: caller,
                price,
                timestamp: now,
            }
        });
        Ok(id)
    }

    /// Change the price of an existing listing. Only the seller may edit;
    /// deactivation goes through [`cancel_listing`](Self::cancel_listing).
    pub fn edit_listing(
        &mut self,
        caller: Address,
        listing_id: ListingId,
        new_price: u64,
    ) -> Result<(), MarketplaceError> {
        let now = self.clock.now();
        let Some(listing) = self.registry.get_mut(&listing_id) else {
            return Err(MarketplaceError::ListingNotFound(listing_id));
        };
        if listing.seller != caller {
            return Err(MarketplaceError::NotOwner);
        }
        if new_price == 0 {
            return Err(MarketplaceError::InvalidPrice);
        }

        listing.price = new_price;
        listing.updated_at = now;

        info!(listing_id = %listing_id, price = new_price, "listing edited");
        self.events.push(MarketEvent::ListingUpdated {
            listing_id,
            seller: caller,
            price: new_price,
            timestamp: now,
        });
        Ok(())
    }

    /// Cancel an active listing and refund its booked fee to the seller.
    /// The only path that returns fee money to a non-operator.
    pub fn cancel_listing(
        &mut self,
        caller: Address,
        listing_id: ListingId,
    ) -> Result<Payment, MarketplaceError> {
        let now = self.clock.now();
        let Some(listing) = self.registry.get(&listing_id) else {
            return Err(MarketplaceError::ListingNotFound(listing_id));
        };
        if listing.seller != caller {
            return Err(MarketplaceError::NotOwner);
        }
        if !listing.active {
            return Err(MarketplaceError::AlreadyCancelled);
        }
        let fee = listing.fee_paid;

        let new_held = self
            .held_balance
            .checked_sub(fee)
            .ok_or(MarketplaceError::LedgerUnderflow)?;
        self.fees.refund(fee)?;
        self.registry.deactivate(&listing_id);
        self.held_balance = new_held;

        info!(listing_id = %listing_id, seller = %caller, refund = fee, "listing cancelled");
        self.events.push(MarketEvent::ListingCancelled {
            listing_id,
            seller: caller,
            timestamp: now,
        });
        Ok(Payment::new(caller, fee))
    }

    /// Buy an active, unexpired listing with payment exactly equal to the
    /// price. Returns the proceeds payment owed to the seller.
    ///
    /// The listing is deactivated and its fee realized before the external
    /// transfer runs, so a reentrant observer sees consistent state; if
    /// the transfer fails both are rolled back and no effects persist.
    pub fn buy(
        &mut self,
        caller: Address,
        listing_id: ListingId,
        payment: u64,
    ) -> Result<Payment, MarketplaceError> {
        let now = self.clock.now();
        let ttl_days = self.config.ttl_days;
        let Some(listing) = self.registry.get(&listing_id) else {
            return Err(MarketplaceError::ListingNotFound(listing_id));
        };
        if !listing.active {
            return Err(MarketplaceError::NotActive);
        }
        if listing.is_expired(now, ttl_days) {
            return Err(MarketplaceError::Expired);
        }
        if payment != listing.price {
            return Err(MarketplaceError::WrongPayment {
                expected: listing.price,
                paid: payment,
            });
        }
        let seller = listing.seller;
        let collection = listing.collection;
        let token_id = listing.token_id;
        let price = listing.price;
        let fee = listing.fee_paid;

        // Effects before the external call
        self.fees.realize(fee)?;
        self.registry.deactivate(&listing_id);

        let transfer_result = match self.asset_mut(collection) {
            Some(asset) => asset.transfer_from(seller, caller, token_id),
            None => Err(AssetError::UnknownToken),
        };
        if let Err(err) = transfer_result {
            warn!(listing_id = %listing_id, %err, "asset transfer failed, rolling back");
            self.fees.unrealize(fee);
            self.registry.reactivate(&listing_id);
            return Err(MarketplaceError::TransferFailed);
        }

        // Buyer payment in, seller proceeds out: held balance is unchanged
        // and stays equal to pending + realized.
        info!(listing_id = %listing_id, buyer = %caller, price, "listing sold");
        self.events.push(MarketEvent::ListingSold {
            listing_id,
            buyer: caller,
            price,
            timestamp: now,
        });
        Ok(Payment::new(seller, price))
    }

    // ---- collection factory ----

    /// Create a new asset collection owned by this marketplace. Returns
    /// the deterministic address of the new collection.
    pub fn create_collection(
        &mut self,
        caller: Address,
        name: &str,
        symbol: &str,
    ) -> Result<Address, MarketplaceError> {
        if name.trim().is_empty() || symbol.trim().is_empty() {
            return Err(MarketplaceError::InvalidMetadata);
        }
        let now = self.clock.now();
        let address = derive_collection_address(caller, self.collections_created, name, symbol);
        self.collections_created += 1;

        self.collections.insert(
            address,
            CollectionRecord {
                address,
                name: name.to_string(),
                symbol: symbol.to_string(),
                creator: caller,
                created_at: now,
            },
        );
        self.minted
            .insert(address, MintedCollection::new(address, self.config.address));

        info!(collection = %address, creator = %caller, name, symbol, "collection created");
        self.events.push(MarketEvent::CollectionCreated {
            address,
            creator: caller,
            timestamp: now,
        });
        Ok(address)
    }

    /// Mint a token with `uri` in a factory-created collection
    pub fn mint(
        &mut self,
        caller: Address,
        collection: Address,
        uri: &str,
    ) -> Result<u64, MarketplaceError> {
        if uri.trim().is_empty() {
            return Err(MarketplaceError::InvalidMetadata);
        }
        let Some(minted) = self.minted.get_mut(&collection) else {
            return Err(MarketplaceError::UnsupportedAsset);
        };
        Ok(minted.mint(caller, uri))
    }

    /// Grant or revoke `operator` over all of the caller's tokens in a
    /// factory-created collection
    pub fn set_approval_for_all(
        &mut self,
        caller: Address,
        collection: Address,
        operator: Address,
        approved: bool,
    ) -> Result<(), MarketplaceError> {
        let Some(minted) = self.minted.get_mut(&collection) else {
            return Err(MarketplaceError::UnsupportedAsset);
        };
        minted.set_approval_for_all(caller, operator, approved);
        Ok(())
    }

    /// Make an externally managed collection tradeable on this market.
    /// Attached handles are runtime collaborators, not durable state.
    pub fn attach_collection(&mut self, address: Address, collection: Box<dyn AssetCollection>) {
        self.external.insert(address, collection);
    }

    // ---- queries ----

    /// The id a listing for `(collection, token_id)` has or would have
    pub fn listing_id_for(&self, collection: Address, token_id: u64) -> ListingId {
        derive_listing_id(collection, token_id)
    }

    pub fn get_listing(&self, listing_id: &ListingId) -> Option<&Listing> {
        self.registry.get(listing_id)
    }

    pub fn get_collection(&self, address: &Address) -> Option<&CollectionRecord> {
        self.collections.get(address)
    }

    pub fn active_listings(&self) -> Vec<&Listing> {
        self.registry.active_listings()
    }

    pub fn listings_by_seller(&self, seller: Address) -> Vec<&Listing> {
        self.registry.active_by_seller(seller)
    }

    pub fn listings_by_collection(&self, collection: Address) -> Vec<&Listing> {
        self.registry.active_by_collection(collection)
    }

    pub fn owner_of(&self, collection: Address, token_id: u64) -> Option<Address> {
        self.asset(collection)?.owner_of(token_id)
    }

    pub fn token_uri(&self, collection: Address, token_id: u64) -> Option<&str> {
        self.minted.get(&collection)?.token_uri(token_id)
    }

    // ---- operator surface ----

    /// Fees booked for active, unsold listings. Operator only.
    pub fn pending_fees(&self, caller: Address) -> Result<u64, MarketplaceError> {
        self.require_operator(caller)?;
        Ok(self.fees.pending())
    }

    /// Fees earned through completed sales, not yet withdrawn. Operator only.
    pub fn realized_fees(&self, caller: Address) -> Result<u64, MarketplaceError> {
        self.require_operator(caller)?;
        Ok(self.fees.realized())
    }

    /// Total value the engine currently holds. Operator only.
    pub fn balance(&self, caller: Address) -> Result<u64, MarketplaceError> {
        self.require_operator(caller)?;
        Ok(self.held_balance)
    }

    /// Pay the whole realized fee balance to the operator. A no-op
    /// returning a zero payment when nothing is realized.
    pub fn withdraw_fees(&mut self, caller: Address) -> Result<Payment, MarketplaceError> {
        self.require_operator(caller)?;
        let amount = self.fees.realized();
        if amount > 0 {
            let now = self.clock.now();
            let new_held = self
                .held_balance
                .checked_sub(amount)
                .ok_or(MarketplaceError::LedgerUnderflow)?;
            self.fees.withdraw();
            self.held_balance = new_held;
            info!(operator = %caller, amount, "fees withdrawn");
            self.events.push(MarketEvent::FeesWithdrawn {
                operator: caller,
                amount,
                timestamp: now,
            });
        }
        Ok(Payment::new(caller, amount))
    }

    // ---- events & persistence hooks ----

    /// Events emitted since the last drain, oldest first
    pub fn events(&self) -> &[MarketEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<MarketEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn fee_ledger(&self) -> &FeeLedger {
        &self.fees
    }

    pub fn registry(&self) -> &ListingRegistry {
        &self.registry
    }

    pub fn collection_records(&self) -> impl Iterator<Item = &CollectionRecord> {
        self.collections.values()
    }

    pub fn collections_created(&self) -> u64 {
        self.collections_created
    }

    /// Re-insert a persisted listing record (see [`crate::repository`])
    pub fn restore_listing(&mut self, listing: Listing) {
        self.registry.restore(listing);
    }

    /// Re-insert a persisted collection record. The token store starts
    /// empty: token ownership belongs to the collection, not to the
    /// marketplace's durable state.
    pub fn restore_collection(&mut self, record: CollectionRecord) {
        let address = record.address;
        self.collections.insert(address, record);
        self.minted
            .insert(address, MintedCollection::new(address, self.config.address));
    }

    /// Restore counters persisted alongside the records. Held balance is
    /// rebuilt from the fee counters, preserving the ledger invariant.
    pub fn restore_counters(&mut self, pending: u64, realized: u64, collections_created: u64) {
        self.fees = FeeLedger::from_counters(pending, realized);
        self.held_balance = pending + realized;
        self.collections_created = collections_created;
    }

    // ---- internals ----

    fn require_operator(&self, caller: Address) -> Result<(), MarketplaceError> {
        if caller != self.config.operator {
            warn!(caller = %caller, "unauthorized operator call");
            return Err(MarketplaceError::Unauthorized);
        }
        Ok(())
    }

    fn asset(&self, address: Address) -> Option<&dyn AssetCollection> {
        if let Some(minted) = self.minted.get(&address) {
            return Some(minted as &dyn AssetCollection);
        }
        self.external.get(&address).map(|b| b.as_ref())
    }

    fn asset_mut(&mut self, address: Address) -> Option<&mut dyn AssetCollection> {
        if let Some(minted) = self.minted.get_mut(&address) {
            return Some(minted as &mut dyn AssetCollection);
        }
        self.external
            .get_mut(&address)
            .map(|b| b.as_mut() as &mut dyn AssetCollection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssetError;

    const OPERATOR: Address = Address([0x0f; 20]);
    const MARKET: Address = Address([0xf0; 20]);

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    fn market() -> Marketplace {
        Marketplace::new(MarketConfig::new(OPERATOR, MARKET))
    }

    /// Marketplace with one collection and one approved, minted token
    fn market_with_token(seller: Address) -> (Marketplace, Address, u64) {
        let mut market = market();
        let collection = market.create_collection(seller, "Lime", "LME").unwrap();
        let token = market.mint(seller, collection, "uri_1").unwrap();
        market
            .set_approval_for_all(seller, collection, MARKET, true)
            .unwrap();
        (market, collection, token)
    }

    fn assert_ledger_invariant(market: &Marketplace) {
        assert_eq!(
            market.fee_ledger().total(),
            market.balance(OPERATOR).unwrap()
        );
    }

    #[test]
    fn test_list_rejects_zero_price() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);
        assert_eq!(
            market.list(seller, collection, token, 0, LISTING_FEE),
            Err(MarketplaceError::InvalidPrice)
        );
    }

    #[test]
    fn test_list_requires_exact_fee() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);

        assert_eq!(
            market.list(seller, collection, token, 500, LISTING_FEE - 1),
            Err(MarketplaceError::InsufficientFee {
                expected: LISTING_FEE,
                paid: LISTING_FEE - 1
            })
        );
        assert_eq!(
            market.list(seller, collection, token, 500, LISTING_FEE + 1),
            Err(MarketplaceError::InsufficientFee {
                expected: LISTING_FEE,
                paid: LISTING_FEE + 1
            })
        );
    }

    #[test]
    fn test_list_rejects_unknown_collection() {
        let seller = addr(1);
        let mut market = market();
        assert_eq!(
            market.list(seller, addr(0xee), 1, 500, LISTING_FEE),
            Err(MarketplaceError::UnsupportedAsset)
        );
    }

    #[test]
    fn test_list_requires_ownership_and_approval() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);

        // Someone else's token
        assert_eq!(
            market.list(addr(2), collection, token, 500, LISTING_FEE),
            Err(MarketplaceError::NotApproved)
        );

        // Owned but unapproved token
        let unapproved = market.mint(addr(3), collection, "uri_2").unwrap();
        assert_eq!(
            market.list(addr(3), collection, unapproved, 500, LISTING_FEE),
            Err(MarketplaceError::NotApproved)
        );
    }

    #[test]
    fn test_list_books_fee_and_indexes() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();

        let listing = market.get_listing(&id).unwrap();
        assert!(listing.active);
        assert_eq!(listing.price, 500);
        assert_eq!(market.pending_fees(OPERATOR).unwrap(), LISTING_FEE);
        assert_eq!(market.realized_fees(OPERATOR).unwrap(), 0);
        assert_eq!(market.listings_by_seller(seller).len(), 1);
        assert_eq!(market.listings_by_collection(collection).len(), 1);
        assert_ledger_invariant(&market);
    }

    #[test]
    fn test_relist_same_token_keeps_identity() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();
        market.cancel_listing(seller, id).unwrap();

        let id_again = market
            .list(seller, collection, token, 900, LISTING_FEE)
            .unwrap();
        assert_eq!(id, id_again);

        let listing = market.get_listing(&id).unwrap();
        assert!(listing.active);
        assert_eq!(listing.price, 900);
        assert_eq!(market.active_listings().len(), 1);
        assert_ledger_invariant(&market);
    }

    #[test]
    fn test_relist_while_active_forfeits_old_fee() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);
        market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();
        market
            .list(seller, collection, token, 700, LISTING_FEE)
            .unwrap();

        assert_eq!(market.pending_fees(OPERATOR).unwrap(), LISTING_FEE);
        assert_eq!(market.realized_fees(OPERATOR).unwrap(), LISTING_FEE);
        assert_eq!(market.active_listings().len(), 1);
        assert_ledger_invariant(&market);
    }

    #[test]
    fn test_edit_listing_checks_owner_and_price() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();

        assert_eq!(
            market.edit_listing(addr(2), id, 700),
            Err(MarketplaceError::NotOwner)
        );
        assert_eq!(
            market.edit_listing(seller, id, 0),
            Err(MarketplaceError::InvalidPrice)
        );

        market.edit_listing(seller, id, 700).unwrap();
        assert_eq!(market.get_listing(&id).unwrap().price, 700);
    }

    #[test]
    fn test_edit_updates_timestamp() {
        let seller = addr(1);
        let clock = crate::clock::ManualClock::default();
        let mut market =
            Marketplace::with_clock(MarketConfig::new(OPERATOR, MARKET), clock.clone());
        let collection = market.create_collection(seller, "Lime", "LME").unwrap();
        let token = market.mint(seller, collection, "uri").unwrap();
        market
            .set_approval_for_all(seller, collection, MARKET, true)
            .unwrap();
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();
        let before = market.get_listing(&id).unwrap().updated_at;

        clock.advance(chrono::Duration::hours(1));
        market.edit_listing(seller, id, 700).unwrap();
        assert!(market.get_listing(&id).unwrap().updated_at > before);
    }

    #[test]
    fn test_cancel_refunds_fee() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();

        let refund = market.cancel_listing(seller, id).unwrap();
        assert_eq!(refund, Payment::new(seller, LISTING_FEE));
        assert!(!market.get_listing(&id).unwrap().active);
        assert_eq!(market.pending_fees(OPERATOR).unwrap(), 0);
        assert_eq!(market.balance(OPERATOR).unwrap(), 0);
        assert_ledger_invariant(&market);
    }

    #[test]
    fn test_cancel_rejects_non_owner_and_double_cancel() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();

        assert_eq!(
            market.cancel_listing(addr(2), id),
            Err(MarketplaceError::NotOwner)
        );
        market.cancel_listing(seller, id).unwrap();
        assert_eq!(
            market.cancel_listing(seller, id),
            Err(MarketplaceError::AlreadyCancelled)
        );
    }

    #[test]
    fn test_buy_moves_token_and_realizes_fee() {
        let seller = addr(1);
        let buyer = addr(2);
        let (mut market, collection, token) = market_with_token(seller);
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();

        let proceeds = market.buy(buyer, id, 500).unwrap();
        assert_eq!(proceeds, Payment::new(seller, 500));
        assert_eq!(market.owner_of(collection, token), Some(buyer));
        assert!(!market.get_listing(&id).unwrap().active);
        assert_eq!(market.pending_fees(OPERATOR).unwrap(), 0);
        assert_eq!(market.realized_fees(OPERATOR).unwrap(), LISTING_FEE);
        assert_ledger_invariant(&market);

        // Exactly-once sale
        assert_eq!(market.buy(addr(3), id, 500), Err(MarketplaceError::NotActive));
    }

    #[test]
    fn test_buy_requires_exact_payment() {
        let seller = addr(1);
        let (mut market, collection, token) = market_with_token(seller);
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();

        assert_eq!(
            market.buy(addr(2), id, 499),
            Err(MarketplaceError::WrongPayment {
                expected: 500,
                paid: 499
            })
        );
        assert_eq!(
            market.buy(addr(2), id, 501),
            Err(MarketplaceError::WrongPayment {
                expected: 500,
                paid: 501
            })
        );
        assert!(market.get_listing(&id).unwrap().active);
    }

    #[test]
    fn test_buy_rejects_expired_listing() {
        let seller = addr(1);
        let clock = crate::clock::ManualClock::default();
        let mut market =
            Marketplace::with_clock(MarketConfig::new(OPERATOR, MARKET), clock.clone());
        let collection = market.create_collection(seller, "Lime", "LME").unwrap();
        let token = market.mint(seller, collection, "uri").unwrap();
        market
            .set_approval_for_all(seller, collection, MARKET, true)
            .unwrap();
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();

        clock.advance(chrono::Duration::days(61));
        assert_eq!(market.buy(addr(2), id, 500), Err(MarketplaceError::Expired));
        // Expiry is lazy: the record still reads as active
        assert!(market.get_listing(&id).unwrap().active);
    }

    /// Collection whose transfers always fail, for rollback coverage
    struct BrokenCollection {
        owner: Address,
    }

    impl AssetCollection for BrokenCollection {
        fn owner_of(&self, _token_id: u64) -> Option<Address> {
            Some(self.owner)
        }

        fn is_approved_for_transfer(
            &self,
            _owner: Address,
            _operator: Address,
            _token_id: u64,
        ) -> bool {
            true
        }

        fn transfer_from(
            &mut self,
            _from: Address,
            _to: Address,
            _token_id: u64,
        ) -> Result<(), AssetError> {
            Err(AssetError::TransferNotAuthorized)
        }
    }

    #[test]
    fn test_buy_rolls_back_on_transfer_failure() {
        let seller = addr(1);
        let mut market = market();
        let broken = addr(0xbb);
        market.attach_collection(broken, Box::new(BrokenCollection { owner: seller }));
        let id = market.list(seller, broken, 1, 500, LISTING_FEE).unwrap();

        assert_eq!(
            market.buy(addr(2), id, 500),
            Err(MarketplaceError::TransferFailed)
        );
        let listing = market.get_listing(&id).unwrap();
        assert!(listing.active);
        assert_eq!(market.pending_fees(OPERATOR).unwrap(), LISTING_FEE);
        assert_eq!(market.realized_fees(OPERATOR).unwrap(), 0);
        assert_eq!(market.active_listings().len(), 1);
        assert_ledger_invariant(&market);
    }

    #[test]
    fn test_create_collection_validates_metadata() {
        let mut market = market();
        assert_eq!(
            market.create_collection(addr(1), "", ""),
            Err(MarketplaceError::InvalidMetadata)
        );
        assert_eq!(
            market.create_collection(addr(1), "Lime", " "),
            Err(MarketplaceError::InvalidMetadata)
        );
    }

    #[test]
    fn test_mint_rejects_blank_uri() {
        let mut market = market();
        let collection = market.create_collection(addr(1), "Lime", "LME").unwrap();
        assert_eq!(
            market.mint(addr(1), collection, ""),
            Err(MarketplaceError::InvalidMetadata)
        );
        assert_eq!(
            market.mint(addr(1), collection, "  "),
            Err(MarketplaceError::InvalidMetadata)
        );
    }

    #[test]
    fn test_create_collection_records_metadata() {
        let mut market = market();
        let creator = addr(1);
        let address = market.create_collection(creator, "Lime", "LME").unwrap();

        let record = market.get_collection(&address).unwrap();
        assert_eq!(record.name, "Lime");
        assert_eq!(record.symbol, "LME");
        assert_eq!(record.creator, creator);
        assert!(market.get_collection(&addr(0xee)).is_none());
    }

    #[test]
    fn test_repeated_creation_yields_distinct_addresses() {
        let mut market = market();
        let a = market.create_collection(addr(1), "Lime", "LME").unwrap();
        let b = market.create_collection(addr(1), "Lime", "LME").unwrap();
        assert_ne!(a, b);
        assert_eq!(market.collections_created(), 2);
    }

    #[test]
    fn test_operator_reads_are_privileged() {
        let market = market();
        assert_eq!(
            market.pending_fees(addr(1)),
            Err(MarketplaceError::Unauthorized)
        );
        assert_eq!(
            market.realized_fees(addr(1)),
            Err(MarketplaceError::Unauthorized)
        );
        assert_eq!(market.balance(addr(1)), Err(MarketplaceError::Unauthorized));
        assert!(market.pending_fees(OPERATOR).is_ok());
    }

    #[test]
    fn test_withdraw_fees_pays_operator_and_zeroes() {
        let seller = addr(1);
        let buyer = addr(2);
        let (mut market, collection, token) = market_with_token(seller);
        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();
        market.buy(buyer, id, 500).unwrap();

        assert_eq!(
            market.withdraw_fees(addr(3)),
            Err(MarketplaceError::Unauthorized)
        );
        let payout = market.withdraw_fees(OPERATOR).unwrap();
        assert_eq!(payout, Payment::new(OPERATOR, LISTING_FEE));
        assert_eq!(market.realized_fees(OPERATOR).unwrap(), 0);
        assert_eq!(market.balance(OPERATOR).unwrap(), 0);

        // Nothing left: no-op, no event
        let events_before = market.events().len();
        let empty = market.withdraw_fees(OPERATOR).unwrap();
        assert_eq!(empty.amount, 0);
        assert_eq!(market.events().len(), events_before);
    }

    #[test]
    fn test_events_are_emitted_once_per_operation() {
        let seller = addr(1);
        let buyer = addr(2);
        let (mut market, collection, token) = market_with_token(seller);
        market.drain_events();

        let id = market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();
        market.buy(buyer, id, 500).unwrap();

        let events = market.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            MarketEvent::ListingAdded { listing_id, price: 500, .. } if listing_id == id
        ));
        assert!(matches!(
            events[1],
            MarketEvent::ListingSold { listing_id, buyer: b, price: 500, .. }
                if listing_id == id && b == buyer
        ));
        assert!(market.events().is_empty());
    }
}
