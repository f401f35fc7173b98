use bitcoin::block::Header;
use bitcoin::hashes::Hash;
use bitcoin::{Amount, Block, BlockHash, CompactTarget, SignedAmount, TxMerkleNode};

/// A candidate block plus the per-transaction metadata miners need.
///
/// Slot 0 holds the coinbase; on proof-of-stake templates slot 1 holds the
/// coinstake. `tx_fees` and `tx_sigops_cost` run parallel to the selected
/// mempool transactions; VM-emitted value transfers carry no entries of
/// their own.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    /// The assembled block.
    pub block: Block,
    /// Fee paid by each selected transaction; slot 0 carries the negated
    /// total fee.
    pub tx_fees: Vec<SignedAmount>,
    /// Sigop cost of each selected transaction, in block cost units.
    pub tx_sigops_cost: Vec<i64>,
    /// Serialized witness-commitment output script of the coinbase.
    pub coinbase_commitment: Vec<u8>,
    /// Total fees collected from the selected transactions.
    pub total_fees: Amount,
}

impl BlockTemplate {
    pub(crate) fn new() -> Self {
        Self {
            block: Block {
                header: Header {
                    version: bitcoin::block::Version::NO_SOFT_FORK_SIGNALLING,
                    prev_blockhash: BlockHash::all_zeros(),
                    merkle_root: TxMerkleNode::all_zeros(),
                    time: 0,
                    bits: CompactTarget::from_consensus(0),
                    nonce: 0,
                },
                txdata: Vec::new(),
            },
            tx_fees: Vec::new(),
            tx_sigops_cost: Vec::new(),
            coinbase_commitment: Vec::new(),
            total_fees: Amount::ZERO,
        }
    }
}
