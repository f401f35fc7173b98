//! Timing parameters for the staker thread, rescaled with block spacing.

use ember_primitives::ChainParams;

/// Upper bound on how far past the wall clock a stake timestamp may search,
/// in seconds.
pub const MAX_STAKE_LOOKAHEAD: u32 = 15;

/// Seconds reserved before a template deadline for contract bytecode
/// execution.
pub const BYTECODE_TIME_BUFFER: u32 = 6;

/// Seconds reserved before a template deadline for signing the stake.
pub const STAKE_TIME_BUFFER: u32 = 2;

/// Staker polling period, in milliseconds.
pub const STAKER_POLLING_PERIOD: u32 = 5_000;

/// Polling period when mining at minimum difficulty, in milliseconds. Keeps
/// test networks from producing a block every few seconds.
pub const STAKER_POLLING_PERIOD_MIN_DIFFICULTY: u32 = 20_000;

/// How long the staker waits for a valid block from the network before
/// staking on top of its own tip, in milliseconds.
pub const STAKER_WAIT_FOR_VALID_BLOCK: u32 = 3_000;

/// How long the staker waits for the best block header to arrive, in
/// milliseconds.
pub const STAKER_WAIT_FOR_BEST_BLOCK_HEADER: u32 = 250;

/// Staker timing constants, rescaled by the height-dependent downscale
/// factor of the chain.
///
/// The cached downscale factor persists across [`MinerParams::update`]
/// calls: values are only recomputed when the factor changes. A single
/// instance shared across chains with different downscale factors would
/// observe stale values until the factor changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerParams {
    /// Stake timestamp search window, seconds.
    pub max_stake_lookahead: u32,
    /// Deadline buffer for contract execution, seconds.
    pub bytecode_time_buffer: u32,
    /// Deadline buffer for stake signing, seconds.
    pub stake_time_buffer: u32,
    /// Staker polling period, milliseconds.
    pub miner_sleep: u32,
    /// Wait for a valid network block, milliseconds.
    pub miner_wait_valid_block: u32,
    /// Wait for the best block header, milliseconds.
    pub miner_wait_best_block_header: u32,
    time_downscale: u32,
}

impl Default for MinerParams {
    fn default() -> Self {
        Self {
            max_stake_lookahead: MAX_STAKE_LOOKAHEAD,
            bytecode_time_buffer: BYTECODE_TIME_BUFFER,
            stake_time_buffer: STAKE_TIME_BUFFER,
            miner_sleep: STAKER_POLLING_PERIOD,
            miner_wait_valid_block: STAKER_WAIT_FOR_VALID_BLOCK,
            miner_wait_best_block_header: STAKER_WAIT_FOR_BEST_BLOCK_HEADER,
            time_downscale: 1,
        }
    }
}

impl MinerParams {
    /// Rescale the timing constants for mining at the given height.
    ///
    /// `min_difficulty` overrides the polling period regardless of the
    /// downscale factor.
    pub fn update(&mut self, height: u32, chain_params: &ChainParams, min_difficulty: bool) {
        let downscale = chain_params.timestamp_downscale_factor(height);
        if self.time_downscale != downscale {
            self.time_downscale = downscale;
            let target_spacing = chain_params.target_spacing(height);
            self.max_stake_lookahead =
                (MAX_STAKE_LOOKAHEAD / downscale).max(1).min(target_spacing);
            self.bytecode_time_buffer = (BYTECODE_TIME_BUFFER / downscale).max(1);
            self.stake_time_buffer = (STAKE_TIME_BUFFER / downscale).max(1);
            self.miner_sleep = (STAKER_POLLING_PERIOD / downscale).max(1);
            self.miner_wait_valid_block = (STAKER_WAIT_FOR_VALID_BLOCK / downscale).max(1);
        }

        if min_difficulty && self.miner_sleep != STAKER_POLLING_PERIOD_MIN_DIFFICULTY {
            self.miner_sleep = STAKER_POLLING_PERIOD_MIN_DIFFICULTY;
        }
    }
}
