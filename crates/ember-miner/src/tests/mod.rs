//! Test harness: mock collaborators and transaction builders.


use crate::assembler::{BlockAssembler, Options};
use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::script::Builder;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, Witness,
};
use ember_mempool::{EntryId, EntryParams, MemPool};
use ember_primitives::contract::{ContractExecResult, OP_CALL};
use ember_primitives::{
    BlockValidityError, ChainApi, ChainParams, ChainTip, ContractVm, DgpReader, StateRoot,
    VmError, VmTransaction,
};
use std::cell::Cell;
use std::collections::HashMap;
use std::collections::VecDeque;

pub(crate) fn chain_params() -> ChainParams {
    ChainParams::new(bitcoin::Network::Regtest)
}

pub(crate) struct MockChain {
    pub tip: ChainTip,
    pub now: Cell<u32>,
    pub reject_validity: bool,
}

impl MockChain {
    pub fn new(height: u32) -> Self {
        Self {
            tip: ChainTip {
                height,
                hash: BlockHash::from_byte_array([0xab; 32]),
                median_time_past: 1_700_000_000,
            },
            now: Cell::new(1_700_000_600),
            reject_validity: false,
        }
    }
}

impl ChainApi for MockChain {
    fn tip(&self) -> ChainTip {
        self.tip.clone()
    }

    fn adjusted_time(&self) -> u32 {
        self.now.get()
    }

    fn block_version(&self, _height: u32) -> BlockVersion {
        BlockVersion::from_consensus(0x2000_0000)
    }

    fn next_work_required(&self, _header: &Header, _proof_of_stake: bool) -> CompactTarget {
        CompactTarget::from_consensus(0x207f_ffff)
    }

    fn test_block_validity(&self, block: &Block, _height: u32) -> Result<(), BlockValidityError> {
        if self.reject_validity {
            return Err(BlockValidityError("scripted rejection".into()));
        }
        if block.txdata.is_empty() || !block.txdata[0].is_coinbase() {
            return Err(BlockValidityError("first transaction is not coinbase".into()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct TestDgp {
    pub min_gas_price: u64,
    pub block_gas_limit: u64,
}

impl Default for TestDgp {
    fn default() -> Self {
        Self {
            min_gas_price: 40,
            block_gas_limit: 40_000_000,
        }
    }
}

impl DgpReader for TestDgp {
    fn block_gas_limit(&self, _height: u32) -> u64 {
        self.block_gas_limit
    }

    fn min_gas_price(&self, _height: u32) -> u64 {
        self.min_gas_price
    }
}

/// Scripted contract VM: extraction results are keyed by txid, execution
/// results are consumed in order. Every execution advances the state roots,
/// successful or not, so rollback is observable.
pub(crate) struct MockVm {
    state_root: StateRoot,
    utxo_root: StateRoot,
    extractions: HashMap<Txid, Vec<VmTransaction>>,
    executions: VecDeque<Result<ContractExecResult, VmError>>,
}

pub(crate) const INITIAL_STATE_ROOT: StateRoot = StateRoot([0x11; 32]);
pub(crate) const INITIAL_UTXO_ROOT: StateRoot = StateRoot([0x22; 32]);

impl MockVm {
    pub fn new() -> Self {
        Self {
            state_root: INITIAL_STATE_ROOT,
            utxo_root: INITIAL_UTXO_ROOT,
            extractions: HashMap::new(),
            executions: VecDeque::new(),
        }
    }

    pub fn with_extraction(mut self, txid: Txid, vm_txs: Vec<VmTransaction>) -> Self {
        self.extractions.insert(txid, vm_txs);
        self
    }

    pub fn then_execution(mut self, result: Result<ContractExecResult, VmError>) -> Self {
        self.executions.push_back(result);
        self
    }
}

impl ContractVm for MockVm {
    fn state_roots(&self) -> (StateRoot, StateRoot) {
        (self.state_root, self.utxo_root)
    }

    fn set_state_roots(&mut self, state_root: StateRoot, utxo_root: StateRoot) {
        self.state_root = state_root;
        self.utxo_root = utxo_root;
    }

    fn extract(
        &self,
        tx: &Transaction,
        _block_txs: &[Transaction],
        _flags: u32,
    ) -> Result<Vec<VmTransaction>, VmError> {
        self.extractions
            .get(&tx.compute_txid())
            .cloned()
            .ok_or_else(|| VmError::Extraction("unknown contract transaction".into()))
    }

    fn execute(
        &mut self,
        _block: &Block,
        _vm_txs: &[VmTransaction],
        _hard_gas_limit: u64,
        _tip: &ChainTip,
    ) -> Result<ContractExecResult, VmError> {
        self.state_root.0[0] = self.state_root.0[0].wrapping_add(1);
        self.utxo_root.0[0] = self.utxo_root.0[0].wrapping_add(1);
        self.executions
            .pop_front()
            .unwrap_or_else(|| Err(VmError::Execution("no scripted result".into())))
    }
}

pub(crate) fn vm_tx(gas_limit: u64, gas_price: u64) -> VmTransaction {
    VmTransaction {
        value: Amount::ZERO,
        gas_limit,
        gas_price,
        data: vec![0x60, 0x00],
    }
}

pub(crate) fn assembler(
    chain: MockChain,
    dgp: TestDgp,
    vm: MockVm,
    options: Options,
) -> BlockAssembler<MockChain, TestDgp, MockVm> {
    BlockAssembler::new(chain, dgp, vm, chain_params(), options)
}

/// Options with the fee floor dropped so small test fees are selectable.
pub(crate) fn zero_fee_options() -> Options {
    Options::builder().block_min_tx_fee(0).build()
}

pub(crate) struct TxBuilder {
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
    lock_time: u32,
}

impl TxBuilder {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    pub fn input(mut self, outpoint: OutPoint) -> Self {
        self.inputs.push(TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        });
        self
    }

    /// A non-final input: lock times apply to this transaction.
    pub fn input_non_final(mut self, outpoint: OutPoint) -> Self {
        self.inputs.push(TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        });
        self
    }

    pub fn output_sat(mut self, value: u64) -> Self {
        self.outputs.push(TxOut {
            value: Amount::from_sat(value),
            script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
        });
        self
    }

    /// An output invoking a contract.
    pub fn contract_output(mut self, value: u64) -> Self {
        self.outputs.push(TxOut {
            value: Amount::from_sat(value),
            script_pubkey: Builder::new()
                .push_int(1)
                .push_slice([0u8; 20])
                .push_opcode(OP_CALL)
                .into_script(),
        });
        self
    }

    /// Pad the transaction with an unspendable output so its virtual size
    /// lands near `vsize`.
    pub fn pad_to_vsize(mut self, vsize: usize) -> Self {
        self.outputs.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: ScriptBuf::from_bytes(vec![0x6a; vsize.saturating_sub(80)]),
        });
        self
    }

    pub fn lock_time(mut self, lock_time: u32) -> Self {
        self.lock_time = lock_time;
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::from_consensus(self.lock_time),
            input: self.inputs,
            output: self.outputs,
        }
    }
}

pub(crate) fn external(n: u8) -> OutPoint {
    OutPoint {
        txid: Txid::from_byte_array([n; 32]),
        vout: 0,
    }
}

pub(crate) fn outpoint_of(tx: &Transaction, vout: u32) -> OutPoint {
    OutPoint {
        txid: tx.compute_txid(),
        vout,
    }
}

pub(crate) fn add_tx(pool: &mut MemPool, tx: &Transaction, fee: u64) -> EntryId {
    pool.insert(tx.clone(), EntryParams::new(Amount::from_sat(fee)))
        .expect("test transaction inserts cleanly")
}

pub(crate) fn add_contract_tx(
    pool: &mut MemPool,
    tx: &Transaction,
    fee: u64,
    min_gas_price: u64,
) -> EntryId {
    pool.insert(
        tx.clone(),
        EntryParams::new(Amount::from_sat(fee)).min_gas_price(min_gas_price),
    )
    .expect("test transaction inserts cleanly")
}

pub(crate) fn txids_of(block: &Block) -> Vec<Txid> {
    block.txdata.iter().map(|tx| tx.compute_txid()).collect()
}
