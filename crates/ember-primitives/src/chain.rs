//! Read access to the active chain, as consumed by the block assembler.

use bitcoin::block::{Header, Version};
use bitcoin::{Block, BlockHash, CompactTarget};

/// Snapshot of the chain tip taken at the start of a template build.
#[derive(Debug, Clone)]
pub struct ChainTip {
    /// Height of the tip block.
    pub height: u32,
    /// Hash of the tip block.
    pub hash: BlockHash,
    /// Median time past of the tip, used as the lock-time cutoff.
    pub median_time_past: u32,
}

/// A candidate block failed the post-assembly validity check.
#[derive(Debug, thiserror::Error)]
#[error("block validity check failed: {0}")]
pub struct BlockValidityError(pub String);

/// The chain state queries the block assembler needs.
///
/// Template construction runs with the chain state locked, so a consistent
/// view across calls within one build is expected from implementations.
pub trait ChainApi {
    /// Current chain tip.
    fn tip(&self) -> ChainTip;

    /// Network-adjusted wall clock, in seconds since the epoch.
    fn adjusted_time(&self) -> u32;

    /// Block version computed from the version-bits deployment state for a
    /// block at the given height.
    fn block_version(&self, height: u32) -> Version;

    /// Difficulty target required for the next block.
    fn next_work_required(&self, header: &Header, proof_of_stake: bool) -> CompactTarget;

    /// Full contextual validity check of an assembled block, without the
    /// proof-of-work and merkle checks that only apply to sealed blocks.
    fn test_block_validity(&self, block: &Block, height: u32) -> Result<(), BlockValidityError>;
}
