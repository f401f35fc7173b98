//! Arena-based mempool entry storage with a mining-order index.
//!
//! The arena uses SlotMap for handle-based entry storage, avoiding reference
//! cycles and enabling safe mutation. The sorted index key is cached in each
//! entry to solve the remove-before-mutate problem when updating the BTreeSet
//! index: the old key must be removed before the entry state changes,
//! otherwise the stale key can no longer be found.

use crate::types::EntryId;
use bitcoin::{Amount, SignedAmount, Transaction, Txid, Weight};
use slotmap::{DefaultKey, SlotMap};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Comparable key for the ancestor-score-or-gas-price index.
///
/// This is the mining order: contract transactions offering less than the
/// DGP minimum gas price rank below everything else; within each class,
/// entries rank by ancestor feerate (modified fees with ancestors over size
/// with ancestors), compared exactly by cross-multiplication; exact ties
/// break by insertion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AncestorScoreKey {
    /// Contract transaction whose minimum output gas price is under the DGP
    /// floor. Sorts after everything else.
    pub below_min_gas_price: bool,
    /// Modified fees including ancestors, in satoshis.
    pub mod_fees_with_ancestors: i64,
    /// Virtual size including ancestors.
    pub size_with_ancestors: i64,
    /// Insertion-order tie-breaker.
    pub sequence: u64,
}

impl Ord for AncestorScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.below_min_gas_price
            .cmp(&other.below_min_gas_price)
            .then_with(|| {
                // Higher ancestor score sorts first. Cross-multiplying keeps
                // the comparison exact; sizes are always positive.
                let lhs = self.mod_fees_with_ancestors as i128 * other.size_with_ancestors as i128;
                let rhs = other.mod_fees_with_ancestors as i128 * self.size_with_ancestors as i128;
                rhs.cmp(&lhs)
            })
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for AncestorScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for AncestorScoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AncestorScoreKey {}

/// Mempool entry with cached ancestor/descendant state.
pub struct MemPoolEntry {
    /// Transaction data.
    pub tx: Arc<Transaction>,

    /// Base fee (without priority adjustments).
    pub fee: Amount,

    /// Modified fee (base fee plus the priority delta).
    pub modified_fee: SignedAmount,

    /// Cached transaction weight.
    pub tx_weight: Weight,

    /// Cached virtual size.
    pub tx_size: i64,

    /// Signature operation cost, in block cost units.
    pub sigop_cost: i64,

    /// Entry timestamp (seconds since epoch).
    pub time: u32,

    /// Block height when the transaction entered the pool.
    pub entry_height: u32,

    /// Monotonic insertion counter; the mining-order tie-breaker.
    pub sequence: u64,

    /// Whether any output executes contract bytecode.
    pub has_create_or_call: bool,

    /// Minimum gas price across contract outputs, satoshis per gas.
    pub min_gas_price: u64,

    // === Mutable ancestor/descendant state (always includes this tx) ===
    pub count_with_ancestors: u64,
    pub size_with_ancestors: i64,
    pub fees_with_ancestors: SignedAmount,
    pub sigops_with_ancestors: i64,

    pub count_with_descendants: u64,
    pub size_with_descendants: i64,
    pub fees_with_descendants: SignedAmount,

    // === Graph links (handles only, no direct references) ===
    /// In-pool transactions this entry spends from.
    pub parents: HashSet<EntryId>,

    /// In-pool transactions spending from this entry.
    pub children: HashSet<EntryId>,

    /// Cached index key; updated atomically with the indexed state.
    pub(crate) cached_score_key: AncestorScoreKey,
}

impl MemPoolEntry {
    /// The entry's current position key in the mining order.
    pub fn score_key(&self) -> AncestorScoreKey {
        self.cached_score_key
    }
}

/// Arena holding all mempool entries, indexed by txid and mining order.
pub struct MemPoolArena {
    /// Primary storage: handle -> entry.
    entries: SlotMap<DefaultKey, MemPoolEntry>,

    /// Index by transaction ID.
    by_txid: HashMap<Txid, EntryId>,

    /// Sorted by ancestor score or gas price (mining order).
    by_score: BTreeSet<(AncestorScoreKey, EntryId)>,

    /// DGP minimum gas price the index keys were computed against.
    min_gas_price: u64,
}

impl MemPoolArena {
    /// Create a new empty arena ranking sub-`min_gas_price` contract entries
    /// last.
    pub fn new(min_gas_price: u64) -> Self {
        Self {
            entries: SlotMap::new(),
            by_txid: HashMap::new(),
            by_score: BTreeSet::new(),
            min_gas_price,
        }
    }

    fn compute_score_key(&self, entry: &MemPoolEntry) -> AncestorScoreKey {
        AncestorScoreKey {
            below_min_gas_price: entry.has_create_or_call
                && entry.min_gas_price < self.min_gas_price,
            mod_fees_with_ancestors: entry.fees_with_ancestors.to_sat(),
            size_with_ancestors: entry.size_with_ancestors,
            sequence: entry.sequence,
        }
    }

    /// Insert a new entry and index it. Returns the entry handle.
    pub fn insert(&mut self, mut entry: MemPoolEntry) -> EntryId {
        let txid = entry.tx.compute_txid();
        let key = self.compute_score_key(&entry);
        entry.cached_score_key = key;

        let id = EntryId(self.entries.insert(entry));
        self.by_txid.insert(txid, id);
        self.by_score.insert((key, id));
        id
    }

    /// Remove an entry from the arena and all indices.
    pub fn remove(&mut self, id: EntryId) -> Option<MemPoolEntry> {
        let entry = self.entries.remove(id.0)?;
        self.by_txid.remove(&entry.tx.compute_txid());
        self.by_score.remove(&(entry.cached_score_key, id));
        Some(entry)
    }

    /// Apply deltas to an entry's ancestor aggregates and reindex.
    pub fn update_ancestor_state(
        &mut self,
        id: EntryId,
        size_delta: i64,
        fee_delta: i64,
        count_delta: i64,
        sigops_delta: i64,
    ) {
        // Capture the old key and remove the index entry before mutating.
        let old_key = self.entries[id.0].cached_score_key;
        self.by_score.remove(&(old_key, id));

        let entry = &mut self.entries[id.0];
        entry.size_with_ancestors += size_delta;
        entry.fees_with_ancestors =
            SignedAmount::from_sat(entry.fees_with_ancestors.to_sat() + fee_delta);
        entry.count_with_ancestors = (entry.count_with_ancestors as i64 + count_delta) as u64;
        entry.sigops_with_ancestors += sigops_delta;

        let new_key = self.compute_score_key(&self.entries[id.0]);
        self.entries[id.0].cached_score_key = new_key;
        self.by_score.insert((new_key, id));
    }

    /// Apply deltas to an entry's descendant aggregates.
    ///
    /// Descendant aggregates do not participate in the mining order, so no
    /// reindexing is needed.
    pub fn update_descendant_state(
        &mut self,
        id: EntryId,
        size_delta: i64,
        fee_delta: i64,
        count_delta: i64,
    ) {
        let entry = &mut self.entries[id.0];
        entry.size_with_descendants += size_delta;
        entry.fees_with_descendants =
            SignedAmount::from_sat(entry.fees_with_descendants.to_sat() + fee_delta);
        entry.count_with_descendants = (entry.count_with_descendants as i64 + count_delta) as u64;
    }

    /// Apply a priority delta to the entry's own fee aggregates and reindex.
    pub fn update_modified_fee(&mut self, id: EntryId, fee_delta: i64) {
        let old_key = self.entries[id.0].cached_score_key;
        self.by_score.remove(&(old_key, id));

        let entry = &mut self.entries[id.0];
        entry.modified_fee = SignedAmount::from_sat(entry.modified_fee.to_sat() + fee_delta);
        entry.fees_with_ancestors =
            SignedAmount::from_sat(entry.fees_with_ancestors.to_sat() + fee_delta);
        entry.fees_with_descendants =
            SignedAmount::from_sat(entry.fees_with_descendants.to_sat() + fee_delta);

        let new_key = self.compute_score_key(&self.entries[id.0]);
        self.entries[id.0].cached_score_key = new_key;
        self.by_score.insert((new_key, id));
    }

    /// Change the DGP minimum gas price and recompute every index key.
    pub fn set_min_gas_price(&mut self, min_gas_price: u64) {
        if self.min_gas_price == min_gas_price {
            return;
        }
        self.min_gas_price = min_gas_price;

        self.by_score.clear();
        let mut rebuilt = Vec::with_capacity(self.entries.len());
        for (key, entry) in &self.entries {
            let new_key = AncestorScoreKey {
                below_min_gas_price: entry.has_create_or_call
                    && entry.min_gas_price < min_gas_price,
                ..entry.cached_score_key
            };
            rebuilt.push((EntryId(key), new_key));
        }
        for (id, key) in rebuilt {
            self.entries[id.0].cached_score_key = key;
            self.by_score.insert((key, id));
        }
    }

    /// The DGP minimum gas price the index is currently keyed against.
    pub fn min_gas_price(&self) -> u64 {
        self.min_gas_price
    }

    /// Get entry by ID (immutable).
    pub fn get(&self, id: EntryId) -> Option<&MemPoolEntry> {
        self.entries.get(id.0)
    }

    /// Get entry by ID (mutable).
    ///
    /// Index-relevant state must not be changed through this reference; use
    /// the `update_*` methods instead.
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut MemPoolEntry> {
        self.entries.get_mut(id.0)
    }

    /// Lookup entry ID by txid.
    pub fn get_by_txid(&self, txid: &Txid) -> Option<EntryId> {
        self.by_txid.get(txid).copied()
    }

    /// Iterate entries in mining order (best package score first).
    pub fn iter_by_ancestor_score(&self) -> impl Iterator<Item = (EntryId, &MemPoolEntry)> {
        self.by_score.iter().map(|(_, id)| (*id, &self.entries[id.0]))
    }

    /// Get total number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fees: i64, size: i64, sequence: u64) -> AncestorScoreKey {
        AncestorScoreKey {
            below_min_gas_price: false,
            mod_fees_with_ancestors: fees,
            size_with_ancestors: size,
            sequence,
        }
    }

    #[test]
    fn higher_score_sorts_first() {
        let a = key(300, 100, 0);
        let b = key(100, 100, 1);
        assert!(a < b);
    }

    #[test]
    fn cross_multiplication_is_exact() {
        // 101/100 vs 100/99: close enough that scaled-integer division
        // would tie, but 101*99 < 100*100.
        let a = key(101, 100, 0);
        let b = key(100, 99, 1);
        assert!(b < a);
    }

    #[test]
    fn equal_scores_break_by_insertion_order() {
        let first = key(200, 100, 3);
        let second = key(100, 50, 7);
        assert!(first < second);

        let earlier = key(100, 50, 1);
        assert!(earlier < first);
    }

    #[test]
    fn below_min_gas_price_ranks_last() {
        let rich_but_cheap_gas = AncestorScoreKey {
            below_min_gas_price: true,
            ..key(1_000_000, 100, 0)
        };
        let poor_but_valid = key(1, 100_000, 1);
        assert!(poor_but_valid < rich_but_cheap_gas);
    }
}
