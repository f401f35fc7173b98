//! Consensus helpers shared between block verification and block assembly.

use crate::chain_params::ChainParams;
use bitcoin::absolute::{LockTime, LOCK_TIME_THRESHOLD};
use bitcoin::blockdata::weight::WITNESS_SCALE_FACTOR;
use bitcoin::{Amount, Block, Transaction};

/// Subsidy of the first block, in satoshis.
const INITIAL_SUBSIDY: u64 = 4 * 100_000_000;

/// Checks whether the transaction is final at the given height and cutoff time.
///
/// The cutoff time is the median time past of the chain tip when lock times
/// are evaluated against the clock rather than the height.
pub fn is_final_tx(tx: &Transaction, height: u32, lock_time_cutoff: u32) -> bool {
    if tx.lock_time == LockTime::ZERO {
        return true;
    }

    let lock_time = if tx.lock_time.to_consensus_u32() < LOCK_TIME_THRESHOLD {
        height
    } else {
        lock_time_cutoff
    };

    if tx.lock_time.to_consensus_u32() < lock_time {
        return true;
    }

    // Even if the lock time isn't satisfied, a transaction is still final if
    // every input opted out of lock-time enforcement via a final sequence.
    tx.input.iter().all(|txin| txin.sequence.is_final())
}

/// Counts the sigops for this transaction using legacy counting.
pub fn get_legacy_sig_op_count(tx: &Transaction) -> usize {
    tx.input
        .iter()
        .map(|txin| txin.script_sig.count_sigops_legacy())
        .sum::<usize>()
        + tx.output
            .iter()
            .map(|txout| txout.script_pubkey.count_sigops_legacy())
            .sum::<usize>()
}

/// Returns the transaction's sigop cost in block cost units.
///
/// Legacy sigops weigh [`WITNESS_SCALE_FACTOR`] cost units each, matching the
/// units of the consensus block sigops ceiling.
pub fn get_transaction_sig_op_cost(tx: &Transaction) -> i64 {
    (get_legacy_sig_op_count(tx) * WITNESS_SCALE_FACTOR) as i64
}

/// Whether this transaction is a coinstake: spends a real input and carries
/// the empty marker output in slot 0.
pub fn is_coinstake(tx: &Transaction) -> bool {
    !tx.input.is_empty()
        && !tx.input[0].previous_output.is_null()
        && tx.output.len() >= 2
        && tx.output[0].value == Amount::ZERO
        && tx.output[0].script_pubkey.is_empty()
}

/// Whether this block is proof-of-stake: its second transaction is a coinstake.
pub fn is_proof_of_stake(block: &Block) -> bool {
    block.txdata.len() > 1 && is_coinstake(&block.txdata[1])
}

/// Returns the amount of subsidy at the given height.
pub fn block_subsidy(height: u32, chain_params: &ChainParams) -> Amount {
    let halvings = height / chain_params.subsidy_halving_interval;
    // Force block reward to zero when right shift is undefined.
    if halvings >= 64 {
        return Amount::ZERO;
    }

    Amount::from_sat(INITIAL_SUBSIDY >> halvings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Network, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};

    fn tx_with_lock_time(lock_time: u32, sequence: Sequence) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::from_consensus(lock_time),
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1000),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn zero_lock_time_is_final() {
        let tx = tx_with_lock_time(0, Sequence::ZERO);
        assert!(is_final_tx(&tx, 100, 0));
    }

    #[test]
    fn height_lock_time() {
        let tx = tx_with_lock_time(100, Sequence::ZERO);
        assert!(!is_final_tx(&tx, 100, 0));
        assert!(is_final_tx(&tx, 101, 0));
    }

    #[test]
    fn time_lock_time_uses_cutoff() {
        let t = LOCK_TIME_THRESHOLD + 1000;
        let tx = tx_with_lock_time(t, Sequence::ZERO);
        assert!(!is_final_tx(&tx, 100, t));
        assert!(is_final_tx(&tx, 100, t + 1));
    }

    #[test]
    fn final_sequences_override_lock_time() {
        let tx = tx_with_lock_time(u32::MAX - 1, Sequence::MAX);
        assert!(is_final_tx(&tx, 0, 0));
    }

    #[test]
    fn subsidy_halves_on_schedule() {
        let params = ChainParams::new(Network::Regtest);
        let interval = params.subsidy_halving_interval;

        assert_eq!(block_subsidy(0, &params), Amount::from_sat(INITIAL_SUBSIDY));
        assert_eq!(
            block_subsidy(interval - 1, &params),
            Amount::from_sat(INITIAL_SUBSIDY)
        );
        assert_eq!(
            block_subsidy(interval, &params),
            Amount::from_sat(INITIAL_SUBSIDY / 2)
        );
        assert_eq!(
            block_subsidy(interval * 2, &params),
            Amount::from_sat(INITIAL_SUBSIDY / 4)
        );
        assert_eq!(block_subsidy(interval * 64, &params), Amount::ZERO);
    }
}
