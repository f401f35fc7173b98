//! Contract layer types and the interfaces the block assembler consumes.
//!
//! The contract virtual machine itself lives behind the [`ContractVm`] trait:
//! the assembler only needs to convert a transaction's contract outputs into
//! VM-level transactions, execute them speculatively, and snapshot/restore
//! the global state roots around each attempt.

use crate::chain::ChainTip;
use crate::chain_params::ChainParams;
use bitcoin::opcodes::all::{OP_RETURN_193, OP_RETURN_194, OP_RETURN_195};
use bitcoin::script::Instruction;
use bitcoin::{Amount, Block, Opcode, Transaction, TxOut};

/// Opcode creating a new contract account.
pub const OP_CREATE: Opcode = OP_RETURN_193;
/// Opcode calling into an existing contract account.
pub const OP_CALL: Opcode = OP_RETURN_194;
/// Opcode spending a contract-owned output; only valid inside VM-emitted
/// transactions.
pub const OP_SPEND: Opcode = OP_RETURN_195;

/// Base contract script version flag.
pub const SCRIPT_EXEC_BYTE_CODE: u32 = 1 << 0;
/// Gas schedule revision active from the short-block-time fork.
pub const SCRIPT_EXEC_REDUCED_TIME: u32 = 1 << 1;

/// Default consensus block gas limit when the DGP carries no override.
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 40_000_000;
/// Default minimum gas price in satoshis per gas unit.
pub const DEFAULT_MIN_GAS_PRICE: u64 = 40;
/// Default consensus ceiling on block weight.
pub const DEFAULT_DGP_MAX_BLOCK_WEIGHT: u64 = 8_000_000;
/// Default consensus ceiling on block sigops, in cost units.
pub const DEFAULT_DGP_MAX_BLOCK_SIGOPS: i64 = 80_000;

/// Whether any output of this transaction executes contract bytecode.
pub fn has_create_or_call(tx: &Transaction) -> bool {
    tx.output.iter().any(|txout| {
        txout
            .script_pubkey
            .instructions()
            .any(|ins| matches!(ins, Ok(Instruction::Op(op)) if op == OP_CREATE || op == OP_CALL))
    })
}

/// Script version flags handed to the contract converter at the given height.
pub fn contract_script_flags(height: u32, chain_params: &ChainParams) -> u32 {
    let mut flags = SCRIPT_EXEC_BYTE_CODE;
    if height >= chain_params.reduce_block_time_height {
        flags |= SCRIPT_EXEC_REDUCED_TIME;
    }
    flags
}

/// Opaque handle to a contract-state trie root.
///
/// Captured before a speculative execution and written back to roll the
/// global state forward or back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateRoot(pub [u8; 32]);

/// A VM-level transaction extracted from a contract output.
#[derive(Debug, Clone)]
pub struct VmTransaction {
    /// Native value carried into the VM.
    pub value: Amount,
    /// Gas units this transaction may consume.
    pub gas_limit: u64,
    /// Price offered per gas unit, in satoshis.
    pub gas_price: u64,
    /// Bytecode or call data.
    pub data: Vec<u8>,
}

impl VmTransaction {
    /// Gas units this transaction may consume.
    pub fn gas(&self) -> u64 {
        self.gas_limit
    }

    /// Price offered per gas unit, in satoshis.
    pub fn gas_price(&self) -> u64 {
        self.gas_price
    }
}

/// Outcome of executing a batch of VM transactions, and the accumulator the
/// assembler keeps for the block in progress.
#[derive(Debug, Clone)]
pub struct ContractExecResult {
    /// Total gas consumed.
    pub used_gas: u64,
    /// Value deducted from the block reward and returned to contract senders.
    pub refund_sender: Amount,
    /// Outputs to append to the reward transaction, in order.
    pub refund_outputs: Vec<TxOut>,
    /// Transactions synthesized by the VM that move native coins; staged for
    /// inclusion directly after the contract transaction that produced them.
    pub value_transfers: Vec<Transaction>,
}

impl Default for ContractExecResult {
    fn default() -> Self {
        Self {
            used_gas: 0,
            refund_sender: Amount::ZERO,
            refund_outputs: Vec::new(),
            value_transfers: Vec::new(),
        }
    }
}

/// Contract VM failure surfaced to the assembler.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("failed to extract contract transactions: {0}")]
    Extraction(String),
    #[error("bytecode execution failed: {0}")]
    Execution(String),
    #[error("failed to process execution results: {0}")]
    ProcessingResults(String),
}

/// The contract execution engine as seen by the block assembler.
///
/// Implementations own the global contract state. `execute` may leave that
/// state dirty on failure; callers are expected to capture the roots via
/// [`ContractVm::state_roots`] beforehand and restore them with
/// [`ContractVm::set_state_roots`] when an attempt is rejected.
pub trait ContractVm {
    /// Current (global state root, UTXO state root) pair.
    fn state_roots(&self) -> (StateRoot, StateRoot);

    /// Reset both tries to previously captured roots.
    fn set_state_roots(&mut self, state_root: StateRoot, utxo_root: StateRoot);

    /// Convert the contract outputs of `tx` into VM-level transactions.
    ///
    /// `block_txs` is a read-only view of the block in progress, available to
    /// the converter for context; it must not be mutated.
    fn extract(
        &self,
        tx: &Transaction,
        block_txs: &[Transaction],
        flags: u32,
    ) -> Result<Vec<VmTransaction>, VmError>;

    /// Execute `vm_txs` against the block in progress under the consensus
    /// block gas limit, advancing the global state on success.
    fn execute(
        &mut self,
        block: &Block,
        vm_txs: &[VmTransaction],
        hard_gas_limit: u64,
        tip: &ChainTip,
    ) -> Result<ContractExecResult, VmError>;
}

/// Read access to the Decentralized Governance Protocol: the on-chain source
/// of the contract-related consensus parameters.
pub trait DgpReader {
    /// Consensus block gas limit at the given height.
    fn block_gas_limit(&self, _height: u32) -> u64 {
        DEFAULT_BLOCK_GAS_LIMIT
    }

    /// Minimum gas price a contract transaction must offer.
    fn min_gas_price(&self, _height: u32) -> u64 {
        DEFAULT_MIN_GAS_PRICE
    }

    /// Consensus ceiling on block weight.
    fn max_block_weight(&self, _height: u32) -> u64 {
        DEFAULT_DGP_MAX_BLOCK_WEIGHT
    }

    /// Consensus ceiling on block sigops, in cost units.
    fn max_block_sigops(&self, _height: u32) -> i64 {
        DEFAULT_DGP_MAX_BLOCK_SIGOPS
    }
}
