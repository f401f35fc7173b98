use bitcoin::consensus::Params;
use bitcoin::Network;

/// Target block spacing before the short-block-time fork, in seconds.
pub const TARGET_SPACING: u32 = 128;

/// Factor by which block times shrink at the short-block-time fork.
pub const TIMESTAMP_DOWNSCALE: u32 = 4;

/// Extended [`Params`] for the Ember chain.
///
/// Ember inherits the Bitcoin consensus parameter set and adds the fields
/// the hybrid PoW/PoS consensus and the contract layer need.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Chain params defined in rust-bitcoin.
    pub params: Params,
    /// Whether this chain produces signer-authorized blocks. Staking is
    /// forced off on such chains.
    pub signet_blocks: bool,
    /// Block height at which the short-block-time fork activates.
    pub reduce_block_time_height: u32,
    /// Interval in blocks between subsidy halvings.
    pub subsidy_halving_interval: u32,
    /// Whether blocks are only created on demand (regtest).
    pub mine_blocks_on_demand: bool,
}

impl ChainParams {
    /// Constructs a new instance of [`ChainParams`].
    pub fn new(network: Network) -> Self {
        let params = Params::new(network);
        match network {
            Network::Bitcoin => Self {
                params,
                signet_blocks: false,
                reduce_block_time_height: 845_000,
                subsidy_halving_interval: 985_500,
                mine_blocks_on_demand: false,
            },
            Network::Testnet => Self {
                params,
                signet_blocks: false,
                reduce_block_time_height: 806_600,
                subsidy_halving_interval: 985_500,
                mine_blocks_on_demand: false,
            },
            Network::Signet => Self {
                params,
                signet_blocks: true,
                reduce_block_time_height: 0,
                subsidy_halving_interval: 985_500,
                mine_blocks_on_demand: false,
            },
            Network::Regtest => Self {
                params,
                signet_blocks: false,
                reduce_block_time_height: 0,
                subsidy_halving_interval: 150,
                mine_blocks_on_demand: true,
            },
            _ => unreachable!("Unknown Ember Network"),
        }
    }

    /// Factor by which timing constants shrink at the given height.
    ///
    /// 1 before the short-block-time fork, [`TIMESTAMP_DOWNSCALE`] afterwards.
    pub fn timestamp_downscale_factor(&self, height: u32) -> u32 {
        if height >= self.reduce_block_time_height {
            TIMESTAMP_DOWNSCALE
        } else {
            1
        }
    }

    /// Target spacing between blocks at the given height, in seconds.
    pub fn target_spacing(&self, height: u32) -> u32 {
        TARGET_SPACING / self.timestamp_downscale_factor(height)
    }

    /// Granularity mask applied to proof-of-stake block timestamps.
    ///
    /// Stake timestamps are truncated to a multiple of the mask + 1 so that
    /// stakers search a bounded set of kernel timestamps per spacing.
    pub fn stake_timestamp_mask(&self, height: u32) -> u32 {
        16 / self.timestamp_downscale_factor(height) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downscale_activates_at_fork_height() {
        let params = ChainParams::new(Network::Bitcoin);
        let fork = params.reduce_block_time_height;

        assert_eq!(params.timestamp_downscale_factor(fork - 1), 1);
        assert_eq!(params.timestamp_downscale_factor(fork), TIMESTAMP_DOWNSCALE);

        assert_eq!(params.target_spacing(fork - 1), 128);
        assert_eq!(params.target_spacing(fork), 32);

        assert_eq!(params.stake_timestamp_mask(fork - 1), 15);
        assert_eq!(params.stake_timestamp_mask(fork), 3);
    }

    #[test]
    fn regtest_is_always_downscaled() {
        let params = ChainParams::new(Network::Regtest);
        assert_eq!(params.timestamp_downscale_factor(0), TIMESTAMP_DOWNSCALE);
        assert!(params.mine_blocks_on_demand);
    }

    #[test]
    fn signet_blocks_flag() {
        assert!(ChainParams::new(Network::Signet).signet_blocks);
        assert!(!ChainParams::new(Network::Bitcoin).signet_blocks);
    }
}
