//! The modified set: packages whose cached ancestor state went stale.
//!
//! When a package enters the block, every mempool descendant of its entries
//! still carries ancestor aggregates that include the now-included
//! transactions. Rather than mutate the pool, the selector keeps a private
//! copy of the affected entries with the included ancestors subtracted,
//! ordered by the same score key as the pool index. Index keys are cached
//! so the ordered index can be updated with the remove-before-mutate
//! discipline.

use bitcoin::SignedAmount;
use ember_mempool::{AncestorScoreKey, EntryId, MemPoolEntry};
use std::collections::{BTreeSet, HashMap};

/// A mempool entry with ancestor aggregates adjusted to exclude ancestors
/// already committed to the block in progress.
#[derive(Debug, Clone)]
pub(crate) struct ModifiedEntry {
    pub size_with_ancestors: i64,
    pub mod_fees_with_ancestors: SignedAmount,
    pub sigops_with_ancestors: i64,
    cached_key: AncestorScoreKey,
}

impl ModifiedEntry {
    fn new(entry: &MemPoolEntry) -> Self {
        Self {
            size_with_ancestors: entry.size_with_ancestors,
            mod_fees_with_ancestors: entry.fees_with_ancestors,
            sigops_with_ancestors: entry.sigops_with_ancestors,
            cached_key: entry.score_key(),
        }
    }

    fn compute_key(&self, entry: &MemPoolEntry) -> AncestorScoreKey {
        AncestorScoreKey {
            below_min_gas_price: entry.score_key().below_min_gas_price,
            mod_fees_with_ancestors: self.mod_fees_with_ancestors.to_sat(),
            size_with_ancestors: self.size_with_ancestors,
            sequence: entry.sequence,
        }
    }
}

/// Associative container over [`ModifiedEntry`] keyed by entry identity,
/// with a parallel index in mining order.
///
/// Invariant: an entry present here has at least one ancestor already in the
/// block, and is itself never in the block.
#[derive(Default)]
pub(crate) struct ModifiedTxSet {
    entries: HashMap<EntryId, ModifiedEntry>,
    by_score: BTreeSet<(AncestorScoreKey, EntryId)>,
}

impl ModifiedTxSet {
    /// Subtract a newly included parent from `entry`'s aggregates, creating
    /// the modified entry on first touch.
    pub(crate) fn update_for_parent_inclusion(
        &mut self,
        id: EntryId,
        entry: &MemPoolEntry,
        parent: &MemPoolEntry,
    ) {
        let mut modified = match self.entries.remove(&id) {
            Some(modified) => {
                self.by_score.remove(&(modified.cached_key, id));
                modified
            }
            None => ModifiedEntry::new(entry),
        };

        modified.size_with_ancestors -= parent.tx_size;
        modified.mod_fees_with_ancestors = SignedAmount::from_sat(
            modified.mod_fees_with_ancestors.to_sat() - parent.modified_fee.to_sat(),
        );
        modified.sigops_with_ancestors -= parent.sigop_cost;

        let key = modified.compute_key(entry);
        modified.cached_key = key;
        self.by_score.insert((key, id));
        self.entries.insert(id, modified);
    }

    /// The best-scoring modified package, if any.
    pub(crate) fn best(&self) -> Option<(AncestorScoreKey, EntryId)> {
        self.by_score.iter().next().copied()
    }

    pub(crate) fn get(&self, id: EntryId) -> Option<&ModifiedEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn contains(&self, id: EntryId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drop an entry from both indices.
    pub(crate) fn remove(&mut self, id: EntryId) {
        if let Some(modified) = self.entries.remove(&id) {
            self.by_score.remove(&(modified.cached_key, id));
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
