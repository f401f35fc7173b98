//! The block assembler: ledger, template driver and reward reconstruction.

use crate::commitment::generate_coinbase_commitment;
use crate::error::BlockAssemblerError;
use crate::params::MinerParams;
use crate::template::BlockTemplate;
use crate::LOG_TARGET;
use bitcoin::absolute::LockTime;
use bitcoin::blockdata::weight::WITNESS_SCALE_FACTOR;
use bitcoin::opcodes::OP_0;
use bitcoin::script::Builder;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Block, OutPoint, ScriptBuf, Sequence, SignedAmount, Transaction, TxIn, TxOut, Witness,
};
use ember_mempool::{EntryId, MemPool};
use ember_primitives::consensus::{
    block_subsidy, get_legacy_sig_op_count, is_final_tx, is_proof_of_stake,
};
use ember_primitives::contract::ContractExecResult;
use ember_primitives::{ChainApi, ChainParams, ChainTip, ContractVm, DgpReader};
use std::collections::HashSet;
use std::time::Instant;

/// Default cap on template weight, leaving headroom for the coinbase.
pub const DEFAULT_BLOCK_MAX_WEIGHT: u64 = 7_996_000;

/// Default minimum package feerate for inclusion, in satoshis per kvB.
pub const DEFAULT_BLOCK_MIN_TX_FEE: u64 = 400_000;

/// Which slot carries the block reward, fixed at template start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardKind {
    /// Proof-of-work: the coinbase at slot 0 pays the reward.
    Coinbase,
    /// Proof-of-stake: the coinstake at slot 1 pays the reward; the
    /// subsidy output is its output 1, after the coinstake marker.
    Coinstake,
}

impl RewardKind {
    /// Transaction slot of the reward transaction.
    pub fn slot(self) -> usize {
        match self {
            Self::Coinbase => 0,
            Self::Coinstake => 1,
        }
    }

    /// Output index of the subsidy output within the reward transaction.
    pub fn subsidy_output(self) -> usize {
        match self {
            Self::Coinbase => 0,
            Self::Coinstake => 1,
        }
    }
}

/// Assembly policy options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum template weight; clamped to stay 4000 under the consensus
    /// ceiling and 4000 above zero.
    pub block_max_weight: u64,
    /// Minimum package feerate for inclusion, satoshis per kvB.
    pub block_min_tx_fee: u64,
    /// Override for the header version; honored on mine-on-demand chains
    /// only.
    pub block_version: Option<i32>,
    /// Refuse to execute contract transactions while staking.
    pub disable_contract_staking: bool,
    /// Log the feerate of every selected transaction.
    pub print_priority: bool,
    /// Whether staking is enabled at all.
    pub staking: bool,
    /// Miner-chosen block gas ceiling below the consensus limit.
    pub soft_block_gas_limit: Option<u64>,
    /// Gas cap applied to each contract transaction.
    pub max_tx_gas_limit: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_max_weight: DEFAULT_BLOCK_MAX_WEIGHT,
            block_min_tx_fee: DEFAULT_BLOCK_MIN_TX_FEE,
            block_version: None,
            disable_contract_staking: false,
            print_priority: false,
            staking: true,
            soft_block_gas_limit: None,
            max_tx_gas_limit: None,
        }
    }
}

impl Options {
    /// Create a builder for configuring assembly options.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Fee required of a package of `size` virtual bytes, in satoshis.
    pub(crate) fn min_package_fee(&self, size: i64) -> i64 {
        (self.block_min_tx_fee as i128 * size as i128 / 1000) as i64
    }
}

/// Builder pattern for [`Options`].
#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn block_max_weight(mut self, weight: u64) -> Self {
        self.options.block_max_weight = weight;
        self
    }

    pub fn block_min_tx_fee(mut self, sat_per_kvb: u64) -> Self {
        self.options.block_min_tx_fee = sat_per_kvb;
        self
    }

    pub fn block_version(mut self, version: i32) -> Self {
        self.options.block_version = Some(version);
        self
    }

    pub fn disable_contract_staking(mut self, disable: bool) -> Self {
        self.options.disable_contract_staking = disable;
        self
    }

    pub fn print_priority(mut self, print: bool) -> Self {
        self.options.print_priority = print;
        self
    }

    pub fn staking(mut self, staking: bool) -> Self {
        self.options.staking = staking;
        self
    }

    pub fn soft_block_gas_limit(mut self, limit: u64) -> Self {
        self.options.soft_block_gas_limit = Some(limit);
        self
    }

    pub fn max_tx_gas_limit(mut self, limit: u64) -> Self {
        self.options.max_tx_gas_limit = Some(limit);
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

/// Whether this node may produce proof-of-stake blocks at all.
///
/// Signer-authorized chains create proof-of-work blocks only.
pub fn can_stake(options: &Options, chain_params: &ChainParams) -> bool {
    options.staking && !chain_params.signet_blocks
}

/// Generate a new block template on top of the current tip.
///
/// Holds the ledger for the block in progress; a single instance can build
/// templates repeatedly.
pub struct BlockAssembler<C, D, V> {
    pub(crate) chain: C,
    pub(crate) dgp: D,
    pub(crate) vm: V,
    pub(crate) chain_params: ChainParams,
    pub(crate) options: Options,
    pub(crate) miner_params: MinerParams,

    // Ledger for the block in progress. Counters exclude the coinbase.
    pub(crate) in_block: HashSet<EntryId>,
    pub(crate) block_weight: u64,
    pub(crate) block_sigops_cost: i64,
    pub(crate) block_tx_count: u64,
    pub(crate) fees: Amount,
    pub(crate) contract_totals: ContractExecResult,

    // Per-template state.
    pub(crate) tip: ChainTip,
    pub(crate) height: u32,
    pub(crate) lock_time_cutoff: u32,
    pub(crate) time_limit: u32,
    pub(crate) reward_kind: RewardKind,
    pub(crate) original_reward_tx: Transaction,
    pub(crate) min_gas_price: u64,
    pub(crate) hard_block_gas_limit: u64,
    pub(crate) soft_block_gas_limit: u64,
    pub(crate) tx_gas_limit: u64,
    pub(crate) dgp_max_block_weight: u64,
    pub(crate) dgp_max_block_sigops: i64,

    /// Transaction count of the most recently assembled template.
    pub last_block_tx_count: u64,
    /// Weight of the most recently assembled template.
    pub last_block_weight: u64,
}

impl<C, D, V> BlockAssembler<C, D, V>
where
    C: ChainApi,
    D: DgpReader,
    V: ContractVm,
{
    /// Constructs a new assembler over the given collaborators.
    pub fn new(chain: C, dgp: D, vm: V, chain_params: ChainParams, mut options: Options) -> Self {
        let tip = chain.tip();
        let next_height = tip.height + 1;
        let dgp_max_block_weight = dgp.max_block_weight(next_height);
        let dgp_max_block_sigops = dgp.max_block_sigops(next_height);

        // Limit weight to between 4K and the consensus ceiling minus 4K for
        // sanity.
        options.block_max_weight = options
            .block_max_weight
            .clamp(4000, dgp_max_block_weight - 4000);

        Self {
            chain,
            dgp,
            vm,
            chain_params,
            options,
            miner_params: MinerParams::default(),
            in_block: HashSet::new(),
            block_weight: 4000,
            block_sigops_cost: 400,
            block_tx_count: 0,
            fees: Amount::ZERO,
            contract_totals: ContractExecResult::default(),
            height: next_height,
            lock_time_cutoff: tip.median_time_past,
            time_limit: 0,
            reward_kind: RewardKind::Coinbase,
            original_reward_tx: empty_tx(),
            min_gas_price: 0,
            hard_block_gas_limit: 0,
            soft_block_gas_limit: 0,
            tx_gas_limit: 0,
            dgp_max_block_weight,
            dgp_max_block_sigops,
            last_block_tx_count: 0,
            last_block_weight: 0,
            tip,
        }
    }

    /// Rescale the staker timing parameters for the next block.
    pub fn update_miner_params(&mut self, min_difficulty: bool) {
        let height = self.chain.tip().height + 1;
        self.miner_params
            .update(height, &self.chain_params, min_difficulty);
    }

    /// Staker timing parameters currently in effect.
    pub fn miner_params(&self) -> &MinerParams {
        &self.miner_params
    }

    /// The contract VM this assembler executes against.
    pub fn vm(&self) -> &V {
        &self.vm
    }

    fn reset_block(&mut self) {
        self.in_block.clear();

        // Reserve space for the coinbase tx.
        self.block_weight = 4000;
        self.block_sigops_cost = 400;

        // These counters do not include the coinbase tx.
        self.block_tx_count = 0;
        self.fees = Amount::ZERO;
        self.contract_totals = ContractExecResult::default();
    }

    /// Construct a new block template paying `script_pub_key`.
    ///
    /// `tx_proof_time` seeds the header time of proof-of-stake templates
    /// (zero means now); `time_limit` is a wall-clock deadline past which no
    /// further contract transactions are attempted (zero disables it).
    pub fn create_new_block(
        &mut self,
        mempool: Option<&MemPool>,
        script_pub_key: ScriptBuf,
        proof_of_stake: bool,
        tx_proof_time: u32,
        time_limit: u32,
    ) -> Result<BlockTemplate, BlockAssemblerError> {
        let start = Instant::now();

        self.reset_block();

        let mut template = BlockTemplate::new();

        // Add a dummy coinbase as the first transaction; rebuilt at the end.
        template.block.txdata.push(empty_tx());
        template.tx_fees.push(SignedAmount::from_sat(-1));
        template.tx_sigops_cost.push(-1);

        self.tip = self.chain.tip();
        self.height = self.tip.height + 1;
        self.reward_kind = if proof_of_stake {
            RewardKind::Coinstake
        } else {
            RewardKind::Coinbase
        };

        template.block.header.version = self.chain.block_version(self.height);
        // Mine-on-demand chains only: allow overriding the block version to
        // test forking scenarios.
        if self.chain_params.mine_blocks_on_demand {
            if let Some(version) = self.options.block_version {
                template.block.header.version = bitcoin::block::Version::from_consensus(version);
            }
        }

        if proof_of_stake {
            let mut proof_time = if tx_proof_time == 0 {
                self.chain.adjusted_time()
            } else {
                tx_proof_time
            };
            proof_time &= !self.chain_params.stake_timestamp_mask(self.height);
            template.block.header.time = proof_time;
        } else {
            template.block.header.time = self.chain.adjusted_time();
        }
        self.lock_time_cutoff = self.tip.median_time_past;

        // Build the reward transactions up front: the contract gate rebuilds
        // the reward outputs while the block fills.
        let mut coinbase = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Builder::new()
                    .push_int(self.height as i64)
                    .push_opcode(OP_0)
                    .into_script(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: Vec::new(),
        };
        if proof_of_stake {
            // The coinbase of a proof-of-stake block is empty; the reward
            // flows through the coinstake, signed by the staker later.
            coinbase.output.push(empty_out());
            let coinstake = Transaction {
                version: Version::TWO,
                lock_time: LockTime::ZERO,
                input: Vec::new(),
                output: vec![
                    empty_out(),
                    TxOut {
                        value: Amount::ZERO,
                        script_pubkey: script_pub_key,
                    },
                ],
            };
            self.original_reward_tx = coinstake.clone();
            template.block.txdata.push(coinstake);
            template.tx_fees.push(SignedAmount::from_sat(-1));
            template.tx_sigops_cost.push(-1);
        } else {
            coinbase.output.push(TxOut {
                value: self.fees + block_subsidy(self.height, &self.chain_params),
                script_pubkey: script_pub_key,
            });
            self.original_reward_tx = coinbase.clone();
        }
        template.block.txdata[0] = coinbase;

        // Sample the DGP-governed gas parameters for this height.
        self.min_gas_price = self.dgp.min_gas_price(self.height);
        self.hard_block_gas_limit = self.dgp.block_gas_limit(self.height);
        self.soft_block_gas_limit = self
            .options
            .soft_block_gas_limit
            .map(|soft| soft.min(self.hard_block_gas_limit))
            .unwrap_or(self.hard_block_gas_limit);
        self.tx_gas_limit = self
            .options
            .max_tx_gas_limit
            .unwrap_or(self.soft_block_gas_limit);
        self.dgp_max_block_weight = self.dgp.max_block_weight(self.height);
        self.dgp_max_block_sigops = self.dgp.max_block_sigops(self.height);
        self.time_limit = time_limit;

        let mut packages_selected = 0;
        let mut descendants_updated = 0;
        if let Some(pool) = mempool {
            let (selected, updated) = self.add_package_txs(pool, &mut template);
            packages_selected = selected;
            descendants_updated = updated;
        }
        let selection_elapsed = start.elapsed();

        self.last_block_tx_count = self.block_tx_count;
        self.last_block_weight = self.block_weight;

        // Fold the final fees and any accumulated contract refunds into the
        // reward transaction.
        self.rebuild_refund_transaction(&mut template);

        template.coinbase_commitment = generate_coinbase_commitment(&mut template.block);
        template.tx_fees[0] = SignedAmount::from_sat(-(self.fees.to_sat() as i64));
        template.total_fees = self.fees;

        tracing::info!(
            target: LOG_TARGET,
            "create_new_block(): block weight: {} txs: {} fees: {} sigops: {}",
            template.block.weight().to_wu(),
            self.block_tx_count,
            self.fees.to_sat(),
            self.block_sigops_cost,
        );

        // Fill in the header.
        template.block.header.prev_blockhash = self.tip.hash;
        if !proof_of_stake {
            update_time(&mut template.block, &self.chain_params, &self.tip, &self.chain);
        }
        template.block.header.bits = self
            .chain
            .next_work_required(&template.block.header, proof_of_stake);
        template.block.header.nonce = 0;
        template.tx_sigops_cost[0] =
            (WITNESS_SCALE_FACTOR * get_legacy_sig_op_count(&template.block.txdata[0])) as i64;

        self.chain
            .test_block_validity(&template.block, self.height)?;

        tracing::debug!(
            target: LOG_TARGET,
            "create_new_block() packages: {:.2}ms ({} packages, {} updated descendants), total {:.2}ms",
            selection_elapsed.as_secs_f64() * 1000.0,
            packages_selected,
            descendants_updated,
            start.elapsed().as_secs_f64() * 1000.0,
        );

        Ok(template)
    }

    /// Rebuild the reward transaction from the stored original so that the
    /// subsidy output reflects the fees collected so far, minus the value
    /// refunded to contract senders, with every accumulated refund output
    /// appended in order.
    pub(crate) fn rebuild_refund_transaction(&self, template: &mut BlockTemplate) {
        let slot = self.reward_kind.slot();
        let subsidy_output = self.reward_kind.subsidy_output();

        let mut reward_tx = self.original_reward_tx.clone();
        reward_tx.output[subsidy_output].value = self.fees
            + block_subsidy(self.height, &self.chain_params)
            - self.contract_totals.refund_sender;
        reward_tx
            .output
            .extend(self.contract_totals.refund_outputs.iter().cloned());
        template.block.txdata[slot] = reward_tx;
    }

    /// Append a plain (non-contract) entry to the block and charge the
    /// ledger.
    pub(crate) fn add_to_block(&mut self, pool: &MemPool, id: EntryId, template: &mut BlockTemplate) {
        let entry = pool.get(id).expect("selected entries exist in the pool");

        template.block.txdata.push((*entry.tx).clone());
        template
            .tx_fees
            .push(SignedAmount::from_sat(entry.fee.to_sat() as i64));
        template.tx_sigops_cost.push(entry.sigop_cost);
        self.block_weight += entry.tx_weight.to_wu();
        self.block_tx_count += 1;
        self.block_sigops_cost += entry.sigop_cost;
        self.fees += entry.fee;
        self.in_block.insert(id);

        if self.options.print_priority {
            tracing::info!(
                target: LOG_TARGET,
                "fee rate {} sat/kvB txid {}",
                entry.modified_fee.to_sat() * 1000 / entry.tx_size.max(1),
                entry.tx.compute_txid(),
            );
        }
    }

    /// Whether a package of the given size and sigops cost still fits under
    /// the block ceilings.
    pub(crate) fn test_package(&self, package_size: u64, package_sigops: i64) -> bool {
        if self.block_weight + WITNESS_SCALE_FACTOR as u64 * package_size
            >= self.options.block_max_weight
        {
            return false;
        }
        if self.block_sigops_cost + package_sigops >= self.dgp_max_block_sigops {
            return false;
        }
        true
    }

    /// Transaction-level checks before adding a package to the block:
    /// every transaction must be final at the template height and cutoff.
    pub(crate) fn test_package_transactions(
        &self,
        pool: &MemPool,
        package: &HashSet<EntryId>,
    ) -> bool {
        package.iter().all(|id| {
            pool.get(*id)
                .map(|entry| is_final_tx(&entry.tx, self.height, self.lock_time_cutoff))
                .unwrap_or(false)
        })
    }

    /// Drop entries already committed to the block from `set`.
    pub(crate) fn only_unconfirmed(&self, set: &mut HashSet<EntryId>) {
        set.retain(|id| !self.in_block.contains(id));
    }
}

pub(crate) fn empty_tx() -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: Vec::new(),
        output: Vec::new(),
    }
}

fn empty_out() -> TxOut {
    TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::new(),
    }
}

/// Advance the header time to the later of now and a second past the tip's
/// median time, returning the change in seconds. Recomputes the required
/// work when the chain allows minimum-difficulty blocks, since the target
/// depends on the timestamp there.
pub fn update_time<C: ChainApi>(
    block: &mut Block,
    chain_params: &ChainParams,
    tip: &ChainTip,
    chain: &C,
) -> i64 {
    let old_time = i64::from(block.header.time);
    let new_time = i64::from(tip.median_time_past + 1).max(i64::from(chain.adjusted_time()));

    if old_time < new_time {
        block.header.time = new_time as u32;
    }

    if chain_params.params.allow_min_difficulty_blocks {
        let proof_of_stake = is_proof_of_stake(block);
        block.header.bits = chain.next_work_required(&block.header, proof_of_stake);
    }

    new_time - old_time
}
