//! Shared primitives for the Ember hybrid PoW/PoS chain.
//!
//! Ember reuses the Bitcoin transaction and block formats and layers an
//! account-model contract engine on top of them, paying for execution with
//! UTXO-backed gas. This crate holds what every other component agrees on:
//!
//! - [`ChainParams`]: per-network consensus parameters, including the
//!   height-dependent block spacing introduced by the short-block-time fork.
//! - Consensus helpers: transaction finality, legacy sigop counting and the
//!   block subsidy schedule.
//! - The contract layer seams: opcode detection, the [`ContractVm`] and
//!   [`DgpReader`] traits consumed by the block assembler, and the state
//!   root snapshot tokens.
//! - The [`ChainApi`] trait giving read access to the active chain.

pub mod chain;
pub mod chain_params;
pub mod consensus;
pub mod contract;

pub use self::chain::{BlockValidityError, ChainApi, ChainTip};
pub use self::chain_params::ChainParams;
pub use self::consensus::{
    block_subsidy, get_legacy_sig_op_count, get_transaction_sig_op_cost, is_coinstake,
    is_final_tx, is_proof_of_stake,
};
pub use self::contract::{
    contract_script_flags, has_create_or_call, ContractExecResult, ContractVm, DgpReader,
    StateRoot, VmError, VmTransaction,
};

/// Scale factor applied to non-witness data when computing block weight.
pub use bitcoin::blockdata::weight::WITNESS_SCALE_FACTOR;
