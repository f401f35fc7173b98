//! Coinbase witness commitment construction.
//!
//! Segwit has been active on Ember since genesis, so every template carries
//! a commitment and no activation check against the parent block is needed.

use bitcoin::blockdata::opcodes::all::OP_RETURN;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::script::Builder;
use bitcoin::{Amount, Block, Transaction, TxMerkleNode, TxOut, Witness, Wtxid};

/// Magic prefix of the witness commitment output script.
const WITNESS_COMMITMENT_HEADER: [u8; 4] = [0xaa, 0x21, 0xa9, 0xed];

/// Index of the witness commitment output in the coinbase, if present.
///
/// The commitment is the last output whose script starts with
/// `OP_RETURN PUSH36 0xaa21a9ed`.
pub fn witness_commitment_index(coinbase: &Transaction) -> Option<usize> {
    coinbase.output.iter().rposition(|txout| {
        let script = txout.script_pubkey.as_bytes();
        script.len() >= 38
            && script[0] == OP_RETURN.to_u8()
            && script[1] == 36
            && script[2..6] == WITNESS_COMMITMENT_HEADER
    })
}

fn witness_merkle_root(block: &Block) -> sha256d::Hash {
    let hashes = block.txdata.iter().enumerate().map(|(index, tx)| {
        if index == 0 {
            // The coinbase wtxid is committed as all zeroes.
            Wtxid::all_zeros().to_raw_hash()
        } else {
            tx.compute_wtxid().to_raw_hash()
        }
    });
    bitcoin::merkle_tree::calculate_root(hashes).expect("block has at least the coinbase")
}

/// Append the witness commitment output to the coinbase and set its witness
/// reserved value. Returns the commitment output script bytes.
pub fn generate_coinbase_commitment(block: &mut Block) -> Vec<u8> {
    let witness_root = witness_merkle_root(block);
    let witness_reserved_value = [0u8; 32];

    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(witness_root.as_byte_array());
    preimage[32..].copy_from_slice(&witness_reserved_value);
    let commitment = sha256d::Hash::hash(&preimage);

    let mut payload = [0u8; 36];
    payload[..4].copy_from_slice(&WITNESS_COMMITMENT_HEADER);
    payload[4..].copy_from_slice(commitment.as_byte_array());

    let script = Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(payload)
        .into_script();
    let out = script.to_bytes();

    let coinbase = &mut block.txdata[0];
    coinbase.input[0].witness = Witness::from_slice(&[witness_reserved_value]);
    coinbase.output.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: script,
    });

    out
}

/// Strip the current witness commitment from the coinbase, regenerate it,
/// and recompute the merkle root.
///
/// Callers that mutate the transaction list of an assembled block use this
/// to bring the header and coinbase back in sync.
pub fn regenerate_commitments(block: &mut Block) {
    let mut coinbase = block.txdata[0].clone();
    if let Some(index) = witness_commitment_index(&coinbase) {
        coinbase.output.remove(index);
    }
    block.txdata[0] = coinbase;

    generate_coinbase_commitment(block);

    let hashes = block
        .txdata
        .iter()
        .map(|tx| tx.compute_txid().to_raw_hash());
    block.header.merkle_root = bitcoin::merkle_tree::calculate_root(hashes)
        .map(TxMerkleNode::from_raw_hash)
        .expect("block has at least the coinbase");
}
