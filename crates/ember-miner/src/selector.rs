//! The package selector: ancestor-feerate package selection over the pool.

use crate::assembler::BlockAssembler;
use crate::modified_set::ModifiedTxSet;
use crate::template::BlockTemplate;
use crate::LOG_TARGET;
use ember_mempool::{EntryId, MemPool};
use ember_primitives::{ChainApi, ContractVm, DgpReader};
use std::collections::HashSet;

/// Give up once this many candidates in a row failed while the block is
/// close to full; a simple heuristic to finish quickly against a large pool.
const MAX_CONSECUTIVE_FAILURES: i64 = 1000;

impl<C, D, V> BlockAssembler<C, D, V>
where
    C: ChainApi,
    D: DgpReader,
    V: ContractVm,
{
    /// Fill the template from the pool in ancestor-score order.
    ///
    /// Transactions are not removed from the pool as they are selected, so
    /// the cached ancestor feerates of their descendants go stale as the
    /// block fills. Those descendants get a corrected copy in the modified
    /// set; each round the best modified package competes with the next pool
    /// entry.
    ///
    /// Returns the number of packages selected and of descendants updated.
    pub(crate) fn add_package_txs(
        &mut self,
        pool: &MemPool,
        template: &mut BlockTemplate,
    ) -> (usize, usize) {
        let mut modified = ModifiedTxSet::default();
        // Entries that failed inclusion; never reconsidered in this run.
        let mut failed: HashSet<EntryId> = HashSet::new();

        let mut packages_selected = 0;
        let mut descendants_updated = 0;
        let mut consecutive_failed: i64 = 0;

        // The pool is immutable for the whole selection run, so its mining
        // order can be walked by position.
        let ordered: Vec<EntryId> = pool.iter_by_ancestor_score().map(|(id, _)| id).collect();
        let mut position = 0;

        while position < ordered.len() || !modified.is_empty() {
            if position < ordered.len() {
                // Skip pool entries already handled: committed to the block,
                // superseded by a modified copy, or failed earlier.
                let candidate = ordered[position];
                if modified.contains(candidate)
                    || self.in_block.contains(&candidate)
                    || failed.contains(&candidate)
                {
                    position += 1;
                    continue;
                }
            }

            // Decide which package to evaluate next: the pool entry at the
            // cursor or the best entry of the modified set.
            let mut using_modified = false;
            let iter: EntryId = if position == ordered.len() {
                match modified.best() {
                    Some((_, id)) => {
                        using_modified = true;
                        id
                    }
                    None => break,
                }
            } else {
                let pool_candidate = ordered[position];
                let pool_key = pool
                    .get(pool_candidate)
                    .expect("pool index yields live entries")
                    .score_key();
                match modified.best() {
                    Some((modified_key, id)) if modified_key < pool_key => {
                        using_modified = true;
                        id
                    }
                    _ => {
                        position += 1;
                        pool_candidate
                    }
                }
            };

            debug_assert!(!self.in_block.contains(&iter));

            let entry = pool.get(iter).expect("pool index yields live entries");
            let (package_size, package_fees, package_sigops) = if using_modified {
                let modified_entry = modified.get(iter).expect("best() returned this entry");
                (
                    modified_entry.size_with_ancestors,
                    modified_entry.mod_fees_with_ancestors.to_sat(),
                    modified_entry.sigops_with_ancestors,
                )
            } else {
                (
                    entry.size_with_ancestors,
                    entry.fees_with_ancestors.to_sat(),
                    entry.sigops_with_ancestors,
                )
            };

            if package_fees < self.options.min_package_fee(package_size) {
                // Everything else we might consider has a lower fee rate.
                return (packages_selected, descendants_updated);
            }

            if !self.test_package(package_size as u64, package_sigops) {
                if using_modified {
                    // The best modified entry blocks the head of the set;
                    // drop it so the next best can surface.
                    modified.remove(iter);
                    failed.insert(iter);
                }

                consecutive_failed += 1;
                if consecutive_failed > MAX_CONSECUTIVE_FAILURES
                    && self.block_weight > self.options.block_max_weight - 4000
                {
                    // Give up if we're close to full and haven't succeeded
                    // in a while.
                    break;
                }
                continue;
            }

            let mut ancestors = pool.calculate_ancestors(iter);
            self.only_unconfirmed(&mut ancestors);
            ancestors.insert(iter);

            if !self.test_package_transactions(pool, &ancestors) {
                if using_modified {
                    modified.remove(iter);
                    failed.insert(iter);
                }
                continue;
            }

            // This package will make it in; reset the failure streak.
            consecutive_failed = 0;

            let sorted_entries = sort_for_block(pool, &ancestors);

            let mut package_added = true;
            for &id in &sorted_entries {
                if package_added {
                    let has_contract = pool
                        .get(id)
                        .expect("package entries exist in the pool")
                        .has_create_or_call;
                    if has_contract {
                        package_added =
                            self.attempt_to_add_contract_to_block(pool, id, template);
                        if !package_added {
                            tracing::debug!(
                                target: LOG_TARGET,
                                "Contract execution gate rejected the package of {:?}",
                                iter,
                            );
                            // The whole package is abandoned with it.
                            if using_modified {
                                modified.remove(iter);
                            }
                            failed.insert(iter);
                        }
                    } else {
                        self.add_to_block(pool, id, template);
                    }
                }
                if package_added {
                    modified.remove(id);
                }
            }
            if !package_added {
                continue;
            }

            packages_selected += 1;

            descendants_updated +=
                update_packages_for_added(pool, &ancestors, &failed, &mut modified);
        }

        (packages_selected, descendants_updated)
    }
}

/// Order a package for inclusion: ancestor count ascending, which puts every
/// parent strictly before its children.
pub(crate) fn sort_for_block(pool: &MemPool, package: &HashSet<EntryId>) -> Vec<EntryId> {
    let mut sorted: Vec<EntryId> = package.iter().copied().collect();
    sorted.sort_by_key(|id| {
        let entry = pool.get(*id).expect("package entries exist in the pool");
        (entry.count_with_ancestors, entry.sequence)
    });
    sorted
}

/// Create or update modified entries for every pool descendant of the newly
/// added transactions, subtracting the added ancestors from their cached
/// aggregates. Entries that already failed this run stay failed and are not
/// resurrected. Returns the number of descendants updated.
fn update_packages_for_added(
    pool: &MemPool,
    already_added: &HashSet<EntryId>,
    failed: &HashSet<EntryId>,
    modified: &mut ModifiedTxSet,
) -> usize {
    let mut descendants_updated = 0;
    for &added in already_added {
        let parent = pool.get(added).expect("added entries exist in the pool");
        for descendant in pool.calculate_descendants(added) {
            if already_added.contains(&descendant) || failed.contains(&descendant) {
                continue;
            }
            descendants_updated += 1;
            let entry = pool
                .get(descendant)
                .expect("descendant handles are valid while the pool is locked");
            modified.update_for_parent_inclusion(descendant, entry, parent);
        }
    }
    descendants_updated
}
