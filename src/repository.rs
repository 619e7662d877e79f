//! Durable persistence for marketplace state
//!
//! The listing registry, the fee counters and the collection records are
//! the entire durable state of the engine; this module stores exactly
//! those three through a [`MarketRepository`] trait with a SQLite
//! implementation. Token ownership lives with the asset collections
//! themselves and is deliberately not persisted here.

use crate::collection::CollectionRecord;
use crate::engine::Marketplace;
use crate::registry::Listing;
use crate::types::{Address, ListingId};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::str::FromStr;

/// Store for the engine's durable state
pub trait MarketRepository {
    /// Insert or replace a listing record
    fn save_listing(&self, listing: &Listing) -> Result<()>;

    /// Get one listing by id
    fn load_listing(&self, id: &ListingId) -> Result<Option<Listing>>;

    /// All listing records, active and inactive
    fn load_listings(&self) -> Result<Vec<Listing>>;

    /// Insert or replace a collection record
    fn save_collection(&self, record: &CollectionRecord) -> Result<()>;

    /// All collection records
    fn load_collections(&self) -> Result<Vec<CollectionRecord>>;

    /// Persist the fee counters and the factory nonce
    fn save_counters(&self, pending: u64, realized: u64, collections_created: u64) -> Result<()>;

    /// Restore the counters, if any were saved
    fn load_counters(&self) -> Result<Option<(u64, u64, u64)>>;
}

/// Write the engine's whole durable state through `repo`
pub fn persist(repo: &dyn MarketRepository, market: &Marketplace) -> Result<()> {
    for listing in market.registry().iter() {
        repo.save_listing(listing)?;
    }
    for record in market.collection_records() {
        repo.save_collection(record)?;
    }
    repo.save_counters(
        market.fee_ledger().pending(),
        market.fee_ledger().realized(),
        market.collections_created(),
    )
}

/// Load persisted state into a freshly constructed engine
pub fn restore(repo: &dyn MarketRepository, market: &mut Marketplace) -> Result<()> {
    for record in repo.load_collections()? {
        market.restore_collection(record);
    }
    for listing in repo.load_listings()? {
        market.restore_listing(listing);
    }
    if let Some((pending, realized, collections_created)) = repo.load_counters()? {
        market.restore_counters(pending, realized, collections_created);
    }
    Ok(())
}

/// SQLite implementation of [`MarketRepository`]
pub struct SqliteMarketRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMarketRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create the tables if they do not exist yet
    pub fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id          TEXT PRIMARY KEY,
                seller      TEXT NOT NULL,
                collection  TEXT NOT NULL,
                token_id    INTEGER NOT NULL,
                price       INTEGER NOT NULL,
                fee_paid    INTEGER NOT NULL,
                active      INTEGER NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS collections (
                address     TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                symbol      TEXT NOT NULL,
                creator     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS counters (
                id                  INTEGER PRIMARY KEY CHECK (id = 0),
                pending             INTEGER NOT NULL,
                realized            INTEGER NOT NULL,
                collections_created INTEGER NOT NULL
            );
            "#,
        )
    }
}

fn parse_datetime(idx: usize, text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_address(idx: usize, text: &str) -> Result<Address> {
    Address::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_listing_id(idx: usize, text: &str) -> Result<ListingId> {
    ListingId::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn listing_from_row(row: &rusqlite::Row<'_>) -> Result<Listing> {
    let id: String = row.get(0)?;
    let seller: String = row.get(1)?;
    let collection: String = row.get(2)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Listing {
        id: parse_listing_id(0, &id)?,
        seller: parse_address(1, &seller)?,
        collection: parse_address(2, &collection)?,
        token_id: row.get::<_, i64>(3)? as u64,
        price: row.get::<_, i64>(4)? as u64,
        fee_paid: row.get::<_, i64>(5)? as u64,
        active: row.get(6)?,
        created_at: parse_datetime(7, &created_at)?,
        updated_at: parse_datetime(8, &updated_at)?,
    })
}

impl MarketRepository for SqliteMarketRepository<'_> {
    fn save_listing(&self, listing: &Listing) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO listings (
                id, seller, collection, token_id, price, fee_paid, active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                listing.id.to_string(),
                listing.seller.to_string(),
                listing.collection.to_string(),
                listing.token_id as i64,
                listing.price as i64,
                listing.fee_paid as i64,
                listing.active,
                listing.created_at.to_rfc3339(),
                listing.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_listing(&self, id: &ListingId) -> Result<Option<Listing>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, seller, collection, token_id, price, fee_paid, active,
                   created_at, updated_at
            FROM listings WHERE id = ?1
            "#,
        )?;
        stmt.query_row([id.to_string()], listing_from_row).optional()
    }

    fn load_listings(&self) -> Result<Vec<Listing>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, seller, collection, token_id, price, fee_paid, active,
                   created_at, updated_at
            FROM listings ORDER BY created_at
            "#,
        )?;
        let listings = stmt
            .query_map([], listing_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(listings)
    }

    fn save_collection(&self, record: &CollectionRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO collections (address, name, symbol, creator, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.address.to_string(),
                record.name,
                record.symbol,
                record.creator.to_string(),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_collections(&self) -> Result<Vec<CollectionRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT address, name, symbol, creator, created_at
            FROM collections ORDER BY created_at
            "#,
        )?;
        let records = stmt
            .query_map([], |row| {
                let address: String = row.get(0)?;
                let creator: String = row.get(3)?;
                let created_at: String = row.get(4)?;
                Ok(CollectionRecord {
                    address: parse_address(0, &address)?,
                    name: row.get(1)?,
                    symbol: row.get(2)?,
                    creator: parse_address(3, &creator)?,
                    created_at: parse_datetime(4, &created_at)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    fn save_counters(&self, pending: u64, realized: u64, collections_created: u64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO counters (id, pending, realized, collections_created)
            VALUES (0, ?1, ?2, ?3)
            "#,
            params![pending as i64, realized as i64, collections_created as i64],
        )?;
        Ok(())
    }

    fn load_counters(&self) -> Result<Option<(u64, u64, u64)>> {
        self.conn
            .query_row(
                "SELECT pending, realized, collections_created FROM counters WHERE id = 0",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, i64>(1)? as u64,
                        row.get::<_, i64>(2)? as u64,
                    ))
                },
            )
            .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MarketConfig, Marketplace};
    use crate::types::LISTING_FEE;

    const OPERATOR: Address = Address([0x0f; 20]);
    const MARKET: Address = Address([0xf0; 20]);

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    fn populated_market() -> Marketplace {
        let mut market = Marketplace::new(MarketConfig::new(OPERATOR, MARKET));
        let seller = addr(1);
        let collection = market.create_collection(seller, "Lime", "LME").unwrap();
        let token = market.mint(seller, collection, "uri_1").unwrap();
        market
            .set_approval_for_all(seller, collection, MARKET, true)
            .unwrap();
        market
            .list(seller, collection, token, 500, LISTING_FEE)
            .unwrap();
        market
    }

    #[test]
    fn test_listing_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        SqliteMarketRepository::init_schema(&conn).unwrap();
        let repo = SqliteMarketRepository::new(&conn);

        let market = populated_market();
        let listing = market.active_listings()[0].clone();
        repo.save_listing(&listing).unwrap();

        let loaded = repo.load_listing(&listing.id).unwrap().unwrap();
        assert_eq!(loaded, listing);
        assert!(repo
            .load_listing(&ListingId([9u8; 32]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_save_listing_is_upsert() {
        let conn = Connection::open_in_memory().unwrap();
        SqliteMarketRepository::init_schema(&conn).unwrap();
        let repo = SqliteMarketRepository::new(&conn);

        let market = populated_market();
        let mut listing = market.active_listings()[0].clone();
        repo.save_listing(&listing).unwrap();
        listing.price = 900;
        repo.save_listing(&listing).unwrap();

        let all = repo.load_listings().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].price, 900);
    }

    #[test]
    fn test_full_state_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        SqliteMarketRepository::init_schema(&conn).unwrap();
        let repo = SqliteMarketRepository::new(&conn);

        let market = populated_market();
        persist(&repo, &market).unwrap();

        let mut restored = Marketplace::new(MarketConfig::new(OPERATOR, MARKET));
        restore(&repo, &mut restored).unwrap();

        assert_eq!(restored.registry().len(), 1);
        assert_eq!(restored.active_listings().len(), 1);
        assert_eq!(restored.collection_records().count(), 1);
        assert_eq!(restored.collections_created(), 1);
        assert_eq!(restored.fee_ledger().pending(), LISTING_FEE);
        assert_eq!(restored.fee_ledger().realized(), 0);
        assert_eq!(restored.balance(OPERATOR).unwrap(), LISTING_FEE);
    }

    #[test]
    fn test_counters_default_to_absent() {
        let conn = Connection::open_in_memory().unwrap();
        SqliteMarketRepository::init_schema(&conn).unwrap();
        let repo = SqliteMarketRepository::new(&conn);

        assert_eq!(repo.load_counters().unwrap(), None);
        repo.save_counters(100, 200, 3).unwrap();
        assert_eq!(repo.load_counters().unwrap(), Some((100, 200, 3)));
    }
}
