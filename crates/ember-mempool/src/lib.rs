//! # Ember Mempool
//!
//! Transaction memory pool for the Ember hybrid PoW/PoS chain.
//!
//! 1. Mining order.
//!     - The pool maintains one sorted index over entries: the
//!       ancestor-score-or-gas-price order consumed by the block assembler.
//!     - Contract transactions offering less than the DGP minimum gas price
//!       rank below everything else, so they are only mined when nothing
//!       better remains.
//! 2. Ancestors and descendants.
//!     - Each entry caches aggregates over its unconfirmed ancestors and
//!       descendants so package scores are O(1) to read.
//!     - The dependency graph is kept as handle sets, never references.
//!
//! Admission policy (fees, scripts, standardness, pool limits) is validated
//! upstream; [`MemPool::insert`] records its results.

mod arena;
mod error;
mod options;
mod types;

pub use self::arena::{AncestorScoreKey, MemPoolArena, MemPoolEntry};
pub use self::error::MemPoolError;
pub use self::options::{MemPoolOptions, MemPoolOptionsBuilder};
pub use self::types::{EntryId, EntryParams};

use bitcoin::{SignedAmount, Transaction, Txid};
use ember_primitives::consensus::{get_transaction_sig_op_cost, is_coinstake};
use ember_primitives::contract::has_create_or_call;
use std::collections::HashSet;
use std::sync::Arc;

const LOG_TARGET: &str = "mempool";

/// The transaction memory pool.
///
/// Single-writer: the caller is expected to wrap the pool in its own lock;
/// the block assembler reads it under that lock for the whole selection run.
pub struct MemPool {
    arena: MemPoolArena,
    next_sequence: u64,
}

impl MemPool {
    /// Create a new empty mempool with default options.
    pub fn new() -> Self {
        Self::with_options(MemPoolOptions::default())
    }

    /// Create a new empty mempool with custom options.
    pub fn with_options(options: MemPoolOptions) -> Self {
        Self {
            arena: MemPoolArena::new(options.min_gas_price),
            next_sequence: 0,
        }
    }

    /// Insert a pre-validated transaction.
    ///
    /// In-pool parents must already be present (admission rejects orphans),
    /// so insertion order is topological by construction.
    pub fn insert(&mut self, tx: Transaction, params: EntryParams) -> Result<EntryId, MemPoolError> {
        let txid = tx.compute_txid();
        if self.arena.get_by_txid(&txid).is_some() {
            return Err(MemPoolError::AlreadyInPool(txid));
        }
        if tx.is_coinbase() {
            return Err(MemPoolError::Coinbase);
        }
        if is_coinstake(&tx) {
            return Err(MemPoolError::Coinstake);
        }

        let tx_weight = tx.weight();
        let tx_size = tx_weight.to_vbytes_ceil() as i64;
        let sigop_cost = get_transaction_sig_op_cost(&tx);
        let fee_sat = params.fee.to_sat() as i64;

        let mut parents = HashSet::new();
        for input in &tx.input {
            if let Some(parent) = self.arena.get_by_txid(&input.previous_output.txid) {
                parents.insert(parent);
            }
        }

        let mut ancestors = HashSet::new();
        for &parent in &parents {
            self.collect_ancestors(parent, &mut ancestors);
        }

        let mut entry = MemPoolEntry {
            has_create_or_call: has_create_or_call(&tx),
            min_gas_price: params.min_gas_price,
            tx: Arc::new(tx),
            fee: params.fee,
            modified_fee: SignedAmount::from_sat(fee_sat),
            tx_weight,
            tx_size,
            sigop_cost,
            time: params.time,
            entry_height: params.height,
            sequence: self.next_sequence,
            count_with_ancestors: 1,
            size_with_ancestors: tx_size,
            fees_with_ancestors: SignedAmount::from_sat(fee_sat),
            sigops_with_ancestors: sigop_cost,
            count_with_descendants: 1,
            size_with_descendants: tx_size,
            fees_with_descendants: SignedAmount::from_sat(fee_sat),
            parents: parents.clone(),
            children: HashSet::new(),
            cached_score_key: AncestorScoreKey::default(),
        };

        for &ancestor in &ancestors {
            let anc = self
                .arena
                .get(ancestor)
                .expect("ancestor handles are valid while the pool is locked");
            entry.count_with_ancestors += 1;
            entry.size_with_ancestors += anc.tx_size;
            entry.fees_with_ancestors =
                SignedAmount::from_sat(entry.fees_with_ancestors.to_sat() + anc.modified_fee.to_sat());
            entry.sigops_with_ancestors += anc.sigop_cost;
        }

        self.next_sequence += 1;
        let id = self.arena.insert(entry);

        for &parent in &parents {
            self.arena
                .get_mut(parent)
                .expect("parent handles are valid while the pool is locked")
                .children
                .insert(id);
        }
        for &ancestor in &ancestors {
            self.arena.update_descendant_state(ancestor, tx_size, fee_sat, 1);
        }

        tracing::trace!(target: LOG_TARGET, "Inserted {txid} with {} in-pool ancestors", ancestors.len());

        Ok(id)
    }

    /// Apply a priority delta to a transaction's modified fee.
    ///
    /// The delta flows into the entry itself, the ancestor fees of all of
    /// its descendants and the descendant fees of all of its ancestors.
    pub fn prioritise_transaction(
        &mut self,
        txid: &Txid,
        fee_delta: SignedAmount,
    ) -> Result<(), MemPoolError> {
        let id = self
            .arena
            .get_by_txid(txid)
            .ok_or(MemPoolError::NotInPool(*txid))?;
        let delta = fee_delta.to_sat();

        self.arena.update_modified_fee(id, delta);
        for descendant in self.calculate_descendants(id) {
            self.arena.update_ancestor_state(descendant, 0, delta, 0, 0);
        }
        for ancestor in self.calculate_ancestors(id) {
            self.arena.update_descendant_state(ancestor, 0, delta, 0);
        }

        tracing::debug!(target: LOG_TARGET, "Priority of {txid} adjusted by {delta} sat");
        Ok(())
    }

    /// All unconfirmed ancestors of `id`, excluding `id` itself.
    pub fn calculate_ancestors(&self, id: EntryId) -> HashSet<EntryId> {
        let mut ancestors = HashSet::new();
        if let Some(entry) = self.arena.get(id) {
            for &parent in &entry.parents {
                self.collect_ancestors(parent, &mut ancestors);
            }
        }
        ancestors
    }

    /// All in-pool descendants of `id`, excluding `id` itself.
    pub fn calculate_descendants(&self, id: EntryId) -> HashSet<EntryId> {
        let mut descendants = HashSet::new();
        if let Some(entry) = self.arena.get(id) {
            for &child in &entry.children {
                self.collect_descendants(child, &mut descendants);
            }
        }
        descendants
    }

    fn collect_ancestors(&self, id: EntryId, ancestors: &mut HashSet<EntryId>) {
        if !ancestors.insert(id) {
            return;
        }
        if let Some(entry) = self.arena.get(id) {
            for &parent in &entry.parents {
                self.collect_ancestors(parent, ancestors);
            }
        }
    }

    fn collect_descendants(&self, id: EntryId, descendants: &mut HashSet<EntryId>) {
        if !descendants.insert(id) {
            return;
        }
        if let Some(entry) = self.arena.get(id) {
            for &child in &entry.children {
                self.collect_descendants(child, descendants);
            }
        }
    }

    /// Get entry by ID.
    pub fn get(&self, id: EntryId) -> Option<&MemPoolEntry> {
        self.arena.get(id)
    }

    /// Lookup entry ID by txid.
    pub fn get_by_txid(&self, txid: &Txid) -> Option<EntryId> {
        self.arena.get_by_txid(txid)
    }

    /// Iterate entries in mining order (best package score first).
    pub fn iter_by_ancestor_score(&self) -> impl Iterator<Item = (EntryId, &MemPoolEntry)> {
        self.arena.iter_by_ancestor_score()
    }

    /// The DGP minimum gas price the mining order is keyed against.
    pub fn min_gas_price(&self) -> u64 {
        self.arena.min_gas_price()
    }

    /// Re-key the mining order against a new DGP minimum gas price.
    pub fn update_min_gas_price(&mut self, min_gas_price: u64) {
        self.arena.set_min_gas_price(min_gas_price);
    }

    /// Number of transactions in the pool.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

impl Default for MemPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::script::Builder;
    use bitcoin::transaction::Version;
    use bitcoin::{
        Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
    };
    use ember_primitives::contract::OP_CALL;

    fn spend(outpoints: &[OutPoint], outputs: usize) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: outpoints
                .iter()
                .map(|op| TxIn {
                    previous_output: *op,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: (0..outputs)
                .map(|_| TxOut {
                    value: Amount::from_sat(1_000),
                    script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
                })
                .collect(),
        }
    }

    fn external(n: u8) -> OutPoint {
        OutPoint {
            txid: Txid::from_byte_array([n; 32]),
            vout: 0,
        }
    }

    fn contract_spend(outpoint: OutPoint) -> Transaction {
        let mut tx = spend(&[outpoint], 1);
        tx.output[0].script_pubkey = Builder::new()
            .push_int(1)
            .push_slice([0u8; 20])
            .push_opcode(OP_CALL)
            .into_script();
        tx
    }

    #[test]
    fn insert_links_parents_and_seeds_aggregates() {
        let mut pool = MemPool::new();

        let parent = spend(&[external(1)], 1);
        let parent_out = OutPoint {
            txid: parent.compute_txid(),
            vout: 0,
        };
        let parent_id = pool
            .insert(parent, EntryParams::new(Amount::from_sat(0)))
            .unwrap();

        let child = spend(&[parent_out], 1);
        let child_id = pool
            .insert(child, EntryParams::new(Amount::from_sat(10_000)))
            .unwrap();

        let parent_entry = pool.get(parent_id).unwrap();
        let child_entry = pool.get(child_id).unwrap();

        assert_eq!(child_entry.count_with_ancestors, 2);
        assert_eq!(
            child_entry.size_with_ancestors,
            child_entry.tx_size + parent_entry.tx_size
        );
        assert_eq!(child_entry.fees_with_ancestors.to_sat(), 10_000);

        assert_eq!(parent_entry.count_with_descendants, 2);
        assert_eq!(parent_entry.fees_with_descendants.to_sat(), 10_000);

        assert_eq!(pool.calculate_ancestors(child_id), [parent_id].into());
        assert_eq!(pool.calculate_descendants(parent_id), [child_id].into());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut pool = MemPool::new();
        let tx = spend(&[external(1)], 1);
        pool.insert(tx.clone(), EntryParams::new(Amount::from_sat(100)))
            .unwrap();
        assert!(matches!(
            pool.insert(tx, EntryParams::new(Amount::from_sat(100))),
            Err(MemPoolError::AlreadyInPool(_))
        ));
    }

    #[test]
    fn mining_order_by_ancestor_score() {
        let mut pool = MemPool::new();

        // Same size, fees 10 / 30 / 20: order must be 30, 20, 10.
        let a = pool
            .insert(spend(&[external(1)], 1), EntryParams::new(Amount::from_sat(10)))
            .unwrap();
        let b = pool
            .insert(spend(&[external(2)], 1), EntryParams::new(Amount::from_sat(30)))
            .unwrap();
        let c = pool
            .insert(spend(&[external(3)], 1), EntryParams::new(Amount::from_sat(20)))
            .unwrap();

        let order: Vec<EntryId> = pool.iter_by_ancestor_score().map(|(id, _)| id).collect();
        assert_eq!(order, vec![b, c, a]);
    }

    #[test]
    fn cpfp_lifts_parent_score_through_child_key() {
        let mut pool = MemPool::new();

        let parent = spend(&[external(1)], 1);
        let parent_out = OutPoint {
            txid: parent.compute_txid(),
            vout: 0,
        };
        pool.insert(parent, EntryParams::new(Amount::from_sat(0)))
            .unwrap();
        let rich = pool
            .insert(spend(&[external(2)], 1), EntryParams::new(Amount::from_sat(500)))
            .unwrap();
        let child = pool
            .insert(spend(&[parent_out], 1), EntryParams::new(Amount::from_sat(100_000)))
            .unwrap();

        // The child's package score (100_000 / two-tx size) beats the plain
        // rich transaction.
        let order: Vec<EntryId> = pool.iter_by_ancestor_score().map(|(id, _)| id).collect();
        assert_eq!(order.iter().position(|id| *id == child).unwrap(), 0);
        assert!(order.iter().position(|id| *id == rich).unwrap() > 0);
    }

    #[test]
    fn sub_minimum_gas_price_contract_ranks_last() {
        let options = MemPoolOptions::builder().min_gas_price(40).build();
        let mut pool = MemPool::with_options(options);

        let contract = pool
            .insert(
                contract_spend(external(1)),
                EntryParams::new(Amount::from_sat(1_000_000)).min_gas_price(10),
            )
            .unwrap();
        let plain = pool
            .insert(spend(&[external(2)], 1), EntryParams::new(Amount::from_sat(1)))
            .unwrap();

        let order: Vec<EntryId> = pool.iter_by_ancestor_score().map(|(id, _)| id).collect();
        assert_eq!(order, vec![plain, contract]);

        // Lowering the DGP floor re-keys the index and the contract entry's
        // huge fee puts it first again.
        pool.update_min_gas_price(5);
        let order: Vec<EntryId> = pool.iter_by_ancestor_score().map(|(id, _)| id).collect();
        assert_eq!(order, vec![contract, plain]);
    }

    #[test]
    fn prioritise_flows_into_relatives() {
        let mut pool = MemPool::new();

        let parent = spend(&[external(1)], 1);
        let parent_txid = parent.compute_txid();
        let parent_out = OutPoint {
            txid: parent_txid,
            vout: 0,
        };
        let parent_id = pool
            .insert(parent, EntryParams::new(Amount::from_sat(100)))
            .unwrap();
        let child_id = pool
            .insert(spend(&[parent_out], 1), EntryParams::new(Amount::from_sat(100)))
            .unwrap();

        pool.prioritise_transaction(&parent_txid, SignedAmount::from_sat(50))
            .unwrap();

        assert_eq!(pool.get(parent_id).unwrap().modified_fee.to_sat(), 150);
        assert_eq!(pool.get(parent_id).unwrap().fees_with_descendants.to_sat(), 250);
        assert_eq!(pool.get(child_id).unwrap().fees_with_ancestors.to_sat(), 250);
        // Base fees are untouched.
        assert_eq!(pool.get(parent_id).unwrap().fee, Amount::from_sat(100));
    }

    #[test]
    fn coinbase_is_rejected() {
        let mut pool = MemPool::new();
        let mut tx = spend(&[external(1)], 1);
        tx.input[0].previous_output = OutPoint::null();
        tx.input[0].script_sig = ScriptBuf::from_bytes(vec![0x01, 0x02]);
        assert!(matches!(
            pool.insert(tx, EntryParams::new(Amount::ZERO)),
            Err(MemPoolError::Coinbase)
        ));
    }
}
