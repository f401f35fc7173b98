//! # Ember block assembly
//!
//! Builds candidate block templates from the mempool, maximizing collected
//! fees subject to the consensus ceilings (weight, sigops cost, block gas)
//! and the miner's policy limits (minimum fee rate, per-transaction gas cap,
//! soft block gas limit).
//!
//! The selection algorithm orders the mempool by the feerate of each
//! transaction including all of its unconfirmed ancestors. Since entries are
//! not removed from the pool as they are selected, a modified set tracks
//! packages whose cached ancestor state went stale because some of their
//! ancestors entered the block; each round the best modified package and the
//! next pool entry compete for inclusion.
//!
//! Contract transactions take a detour through the execution gate: their
//! bytecode runs speculatively against a snapshot of the global state roots
//! and the attempt is rolled back wholesale if any gas, weight or sigops
//! ceiling would be crossed.

mod assembler;
mod commitment;
mod contract;
mod error;
mod modified_set;
mod params;
mod selector;
mod template;
#[cfg(test)]
mod tests;

pub use self::assembler::{
    can_stake, update_time, BlockAssembler, Options, OptionsBuilder, RewardKind,
    DEFAULT_BLOCK_MAX_WEIGHT, DEFAULT_BLOCK_MIN_TX_FEE,
};
pub use self::commitment::{
    generate_coinbase_commitment, regenerate_commitments, witness_commitment_index,
};
pub use self::error::BlockAssemblerError;
pub use self::params::{
    MinerParams, BYTECODE_TIME_BUFFER, MAX_STAKE_LOOKAHEAD, STAKER_POLLING_PERIOD,
    STAKER_POLLING_PERIOD_MIN_DIFFICULTY, STAKER_WAIT_FOR_BEST_BLOCK_HEADER,
    STAKER_WAIT_FOR_VALID_BLOCK, STAKE_TIME_BUFFER,
};
pub use self::template::BlockTemplate;

const LOG_TARGET: &str = "miner";
