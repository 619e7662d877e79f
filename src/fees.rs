//! Fee escrow ledger
//!
//! Two running totals: fees collected for still-active listings
//! (`pending`) and fees earned through completed sales (`realized`).
//! A booked fee leaves `pending` exactly once, either back to the seller
//! on cancel or into `realized` on sale; `realized` only drains through
//! operator withdrawal.

use crate::error::MarketplaceError;
use serde::{Deserialize, Serialize};

/// Pending vs. realized fee counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeLedger {
    pending: u64,
    realized: u64,
}

impl FeeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore counters from persisted state
    pub fn from_counters(pending: u64, realized: u64) -> Self {
        Self { pending, realized }
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn realized(&self) -> u64 {
        self.realized
    }

    /// Total fee value the engine is holding
    pub fn total(&self) -> u64 {
        self.pending + self.realized
    }

    /// Book a freshly paid listing fee as pending
    pub fn book(&mut self, fee: u64) {
        self.pending += fee;
    }

    /// Return a booked fee to its payer (listing cancelled)
    pub fn refund(&mut self, fee: u64) -> Result<(), MarketplaceError> {
        self.pending = self
            .pending
            .checked_sub(fee)
            .ok_or(MarketplaceError::LedgerUnderflow)?;
        Ok(())
    }

    /// Promote a booked fee from pending to realized (listing sold)
    pub fn realize(&mut self, fee: u64) -> Result<(), MarketplaceError> {
        self.pending = self
            .pending
            .checked_sub(fee)
            .ok_or(MarketplaceError::LedgerUnderflow)?;
        self.realized += fee;
        Ok(())
    }

    /// Undo a [`realize`](Self::realize) after a failed external transfer.
    /// Infallible: rollback is only invoked right after the matching
    /// realize, so `realized >= fee` holds.
    pub(crate) fn unrealize(&mut self, fee: u64) {
        debug_assert!(self.realized >= fee);
        self.realized = self.realized.saturating_sub(fee);
        self.pending += fee;
    }

    /// Drain the whole realized balance, returning the amount withdrawn
    pub fn withdraw(&mut self) -> u64 {
        std::mem::take(&mut self.realized)
    }
}
