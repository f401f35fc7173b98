//! The contract execution gate.
//!
//! Decides whether one contract-carrying transaction can enter the block in
//! progress. All work is tentative against a snapshot of the global state
//! roots: on any rejection the snapshot restores and the attempt leaves no
//! trace in the VM, the ledger or the block.

use crate::assembler::BlockAssembler;
use crate::template::BlockTemplate;
use crate::LOG_TARGET;
use bitcoin::blockdata::weight::WITNESS_SCALE_FACTOR;
use bitcoin::SignedAmount;
use ember_mempool::{EntryId, MemPool};
use ember_primitives::consensus::get_legacy_sig_op_count;
use ember_primitives::contract::{contract_script_flags, StateRoot};
use ember_primitives::{ChainApi, ContractVm, DgpReader};

/// Captured state roots that restore themselves on drop unless committed.
struct StateSnapshot<'a, V: ContractVm> {
    vm: &'a mut V,
    state_root: StateRoot,
    utxo_root: StateRoot,
    committed: bool,
}

impl<'a, V: ContractVm> StateSnapshot<'a, V> {
    fn capture(vm: &'a mut V) -> Self {
        let (state_root, utxo_root) = vm.state_roots();
        Self {
            vm,
            state_root,
            utxo_root,
            committed: false,
        }
    }

    fn vm(&mut self) -> &mut V {
        self.vm
    }

    /// Keep the advanced state: disarms the restore.
    fn commit(mut self) {
        self.committed = true;
    }
}

impl<V: ContractVm> Drop for StateSnapshot<'_, V> {
    fn drop(&mut self) {
        if !self.committed {
            self.vm.set_state_roots(self.state_root, self.utxo_root);
        }
    }
}

impl<C, D, V> BlockAssembler<C, D, V>
where
    C: ChainApi,
    D: DgpReader,
    V: ContractVm,
{
    /// Attempt to add a single contract transaction to the block.
    ///
    /// Enforces the per-transaction gas cap, the soft block gas limit, the
    /// DGP minimum gas price and the hard block weight/sigops ceilings.
    /// Only on `true` has anything — VM state, ledger, block — changed.
    pub(crate) fn attempt_to_add_contract_to_block(
        &mut self,
        pool: &MemPool,
        id: EntryId,
        template: &mut BlockTemplate,
    ) -> bool {
        let entry = pool.get(id).expect("selected entries exist in the pool");
        let txid = entry.tx.compute_txid();

        if self.time_limit != 0
            && self.chain.adjusted_time()
                >= self.time_limit.saturating_sub(self.miner_params.bytecode_time_buffer)
        {
            tracing::debug!(target: LOG_TARGET, "Template deadline too close to execute contract tx {txid}");
            return false;
        }
        if self.options.disable_contract_staking {
            // Contract staking is disabled for this staker.
            return false;
        }

        let mut snapshot = StateSnapshot::capture(&mut self.vm);

        // Operate on shadow copies of the ledger first; applied to the real
        // ledger only on commit.
        let mut block_weight = self.block_weight;
        let mut block_sigops_cost = self.block_sigops_cost;

        let flags = contract_script_flags(self.height, &self.chain_params);
        let vm_txs = match snapshot
            .vm()
            .extract(&entry.tx, &template.block.txdata, flags)
        {
            Ok(vm_txs) => vm_txs,
            Err(err) => {
                // Extraction is validated at pool admission; this can only
                // trigger for raw transactions injected past the pool.
                tracing::debug!(target: LOG_TARGET, "Failed to extract contract transactions from tx {txid}: {err}");
                return false;
            }
        };

        let mut tx_gas: u64 = 0;
        for vm_tx in &vm_txs {
            tx_gas = tx_gas.saturating_add(vm_tx.gas());
            if tx_gas > self.tx_gas_limit {
                tracing::debug!(target: LOG_TARGET, "Gas needed exceeds the per-transaction gas cap for contract tx {txid}");
                return false;
            }
            if self.contract_totals.used_gas + vm_tx.gas() > self.soft_block_gas_limit {
                // Worth a log line only when no other contract made it in.
                if self.contract_totals.used_gas == 0 {
                    tracing::debug!(target: LOG_TARGET, "Gas needed exceeds the soft block gas limit for contract tx {txid}");
                }
                return false;
            }
            if vm_tx.gas_price() < self.min_gas_price {
                tracing::debug!(target: LOG_TARGET, "Gas price is below the minimum gas price for contract tx {txid}");
                return false;
            }
        }

        // Execution runs against the consensus block gas limit, not the soft
        // limit: the hard limit is consensus critical.
        let exec_result = match snapshot.vm().execute(
            &template.block,
            &vm_txs,
            self.hard_block_gas_limit,
            &self.tip,
        ) {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(target: LOG_TARGET, "Bytecode execution failed for contract tx {txid}: {err}");
                return false;
            }
        };

        if self.contract_totals.used_gas + exec_result.used_gas > self.soft_block_gas_limit {
            if self.contract_totals.used_gas == 0 {
                tracing::debug!(target: LOG_TARGET, "Gas used exceeds the soft block gas limit for contract tx {txid}");
            }
            return false;
        }

        // Charge the contract transaction and the transfers it emitted to
        // the shadow ledger.
        block_weight += entry.tx_weight.to_wu();
        block_sigops_cost += entry.sigop_cost;
        for transfer in &exec_result.value_transfers {
            block_weight += transfer.weight().to_wu();
            block_sigops_cost += get_legacy_sig_op_count(transfer) as i64;
        }

        // Swap the reward transaction's sigops for those of its rebuilt
        // form carrying the new refund outputs.
        let slot = self.reward_kind.slot();
        block_sigops_cost -= get_legacy_sig_op_count(&template.block.txdata[slot]) as i64;
        let mut shadow_reward = template.block.txdata[slot].clone();
        shadow_reward
            .output
            .extend(exec_result.refund_outputs.iter().cloned());
        block_sigops_cost += get_legacy_sig_op_count(&shadow_reward) as i64;

        if block_sigops_cost * WITNESS_SCALE_FACTOR as i64 > self.dgp_max_block_sigops
            || block_weight > self.dgp_max_block_weight
        {
            // The contract does not fit; leave the state as before the try.
            return false;
        }

        // The block can take the execution: keep the advanced state roots
        // and apply everything to the real ledger and block.
        snapshot.commit();

        self.contract_totals.used_gas += exec_result.used_gas;
        self.contract_totals.refund_sender += exec_result.refund_sender;
        self.contract_totals
            .refund_outputs
            .extend(exec_result.refund_outputs);

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

        // The staged transfers are emitted right behind their contract
        // transaction and never carried over to the next attempt.
        for transfer in exec_result.value_transfers {
            self.block_weight += transfer.weight().to_wu();
            self.block_sigops_cost += get_legacy_sig_op_count(&transfer) as i64;
            self.block_tx_count += 1;
            template.block.txdata.push(transfer);
        }

        self.block_sigops_cost -= get_legacy_sig_op_count(&template.block.txdata[slot]) as i64;
        self.rebuild_refund_transaction(template);
        self.block_sigops_cost += get_legacy_sig_op_count(&template.block.txdata[slot]) as i64;

        true
    }
}
