//! Core type definitions for the mempool.

use bitcoin::Amount;
use slotmap::DefaultKey;

/// Handle to an entry in the mempool arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) DefaultKey);

/// Pre-validated facts about a transaction entering the pool.
///
/// Admission policy (fee computation, script validation, standardness,
/// ancestor limits) runs upstream of this crate; insertion only records its
/// results.
#[derive(Debug, Clone)]
pub struct EntryParams {
    /// Absolute fee the transaction pays.
    pub fee: Amount,
    /// Time the transaction entered the pool, seconds since the epoch.
    pub time: u32,
    /// Chain height when the transaction entered the pool.
    pub height: u32,
    /// Minimum gas price across the transaction's contract outputs, in
    /// satoshis per gas. Zero for plain transactions.
    pub min_gas_price: u64,
}

impl EntryParams {
    /// Entry facts for a plain value transfer paying `fee`.
    pub fn new(fee: Amount) -> Self {
        Self {
            fee,
            time: 0,
            height: 0,
            min_gas_price: 0,
        }
    }

    /// Sets the minimum output gas price recorded for a contract transaction.
    pub fn min_gas_price(mut self, min_gas_price: u64) -> Self {
        self.min_gas_price = min_gas_price;
        self
    }
}
