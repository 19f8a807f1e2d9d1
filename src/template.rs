//! Block-template assembler (C5, spec.md §4.5): packages mempool entries
//! under weight/sigop budgets in ancestor-feerate order. The teacher has
//! nothing like this (it mines whatever the in-memory UTXO pool happens to
//! hold); this generalizes Bitcoin Core's `BlockAssembler::addPackageTxs`
//! algorithm onto the crate's own [`crate::mempool::Mempool`] (spec.md §9:
//! "rebuild as an ordered set keyed by a comparator... with O(log n) updates").

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::amount::Amount;
use crate::hash::Hash256;
use crate::mempool::{feerate_beats, Mempool, PoolSnapshot};
use crate::params::BlockKind;
use crate::script::Script;
use crate::tx::{Outpoint, Transaction, TxIn, TxOut, WITNESS_SCALE_FACTOR};

pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;
pub const DEFAULT_MAX_WEIGHT: u64 = MAX_BLOCK_WEIGHT - 4_000;
pub const MAX_BLOCK_SIGOPS_COST: u64 = 80_000;
pub const MAX_CONSECUTIVE_FAILURES: u32 = 1_000;
/// "within 4 kB of cap" (spec.md §4.5 step 5).
const NEAR_CAP_MARGIN: u64 = 4_000;

#[derive(Debug, Clone, Copy)]
pub struct TemplateConfig {
    pub max_weight: u64,
    pub max_sigops: u64,
    /// Minimum ancestor feerate, in smallest-units per byte, below which a
    /// candidate terminates the build (spec.md §4.5 step 4).
    pub block_min_fee_rate: f64,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        TemplateConfig {
            max_weight: DEFAULT_MAX_WEIGHT,
            max_sigops: MAX_BLOCK_SIGOPS_COST,
            block_min_fee_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub coinbase: Transaction,
    /// Non-coinbase transactions, in the order they were added — every
    /// ancestor of an entry precedes it (spec.md §8 property 2).
    pub transactions: Vec<Hash256>,
    pub total_fees: i64,
    pub total_sigops: u64,
    pub total_weight: u64,
}

/// Running state for one template build (spec.md §4.5's `inBlock`,
/// `modifiedSet`, `failedSet`, running totals).
struct Assembler {
    snapshot: PoolSnapshot,
    config: TemplateConfig,
    height: u32,
    lock_time_cutoff: DateTime<Utc>,

    included: Vec<Hash256>,
    in_block: HashSet<Hash256>,
    failed: HashSet<Hash256>,
    /// Candidate -> effective (modFee, size, sigops) ancestor aggregate,
    /// reduced as its already-included ancestors are subtracted out.
    modified: HashMap<Hash256, (i64, u64, u64)>,

    weight: u64,
    sigops: u64,
    fees: i64,
    consecutive_failures: u32,
}

impl Assembler {
    fn new(snapshot: PoolSnapshot, config: TemplateConfig, height: u32, lock_time_cutoff: DateTime<Utc>) -> Self {
        Assembler {
            snapshot,
            config,
            height,
            lock_time_cutoff,
            included: Vec::new(),
            in_block: HashSet::new(),
            failed: HashSet::new(),
            modified: HashMap::new(),
            weight: 0,
            sigops: 0,
            fees: 0,
            consecutive_failures: 0,
        }
    }

    fn ancestor_stats(&self, txid: &Hash256) -> (i64, u64, u64) {
        if let Some(stats) = self.modified.get(txid) {
            return *stats;
        }
        let entry = &self.snapshot.entries[txid];
        (entry.ancestor.mod_fee, entry.ancestor.size, entry.ancestor.sigops)
    }

    /// Step 2/3: pick the best candidate from either the mempool's own
    /// ancestor-score order or `modifiedSet`, skipping entries already
    /// decided (`inBlock`/`failedSet`), cross-multiplying to compare
    /// feerates exactly.
    fn best_candidate(&self, cursor: &mut usize) -> Option<Hash256> {
        while *cursor < self.snapshot.order.len() {
            let candidate = self.snapshot.order[*cursor];
            if self.in_block.contains(&candidate)
                || self.failed.contains(&candidate)
                || self.modified.contains_key(&candidate)
            {
                *cursor += 1;
                continue;
            }
            break;
        }
        let from_pool = self.snapshot.order.get(*cursor).copied();

        let mut best_modified: Option<Hash256> = None;
        for txid in self.modified.keys() {
            if self.in_block.contains(txid) || self.failed.contains(txid) {
                continue;
            }
            best_modified = Some(match best_modified {
                None => *txid,
                Some(current_best) => {
                    let (cur_fee, cur_size, _) = self.ancestor_stats(&current_best);
                    let (cand_fee, cand_size, _) = self.ancestor_stats(txid);
                    if feerate_beats(cand_fee, cand_size, cur_fee, cur_size) {
                        *txid
                    } else {
                        current_best
                    }
                }
            });
        }

        match (from_pool, best_modified) {
            (None, winner) => winner,
            (Some(pool_candidate), None) => Some(pool_candidate),
            (Some(pool_candidate), Some(modified_candidate)) => {
                let (pf, ps, _) = self.ancestor_stats(&pool_candidate);
                let (mf, ms, _) = self.ancestor_stats(&modified_candidate);
                if feerate_beats(mf, ms, pf, ps) {
                    Some(modified_candidate)
                } else {
                    Some(pool_candidate)
                }
            }
        }
    }

    /// Step 8: after including `txid`, every in-mempool child not yet
    /// included gets its effective ancestor aggregate reduced by `txid`'s
    /// own contribution and moves into `modifiedSet`.
    fn relax_children(&mut self, txid: Hash256) {
        let entry_own = {
            let entry = &self.snapshot.entries[&txid];
            (entry.fee, entry.size, entry.sigop_cost)
        };
        let children: Vec<Hash256> = self
            .snapshot
            .children
            .get(&txid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        for child in children {
            if self.in_block.contains(&child) {
                continue;
            }
            let (fee, size, sigops) = self.ancestor_stats(&child);
            self.modified.insert(child, (fee - entry_own.0, size - entry_own.1, sigops - entry_own.2));
        }
    }

    fn add_entry(&mut self, txid: Hash256) {
        let entry = &self.snapshot.entries[&txid];
        self.weight += WITNESS_SCALE_FACTOR as u64 * entry.size;
        self.sigops += entry.sigop_cost;
        self.fees += entry.fee;
        self.in_block.insert(txid);
        self.included.push(txid);
        self.modified.remove(&txid);
    }

    fn run(mut self) -> (Vec<Hash256>, i64, u64, u64) {
        let mut cursor = 0usize;
        loop {
            let candidate = match self.best_candidate(&mut cursor) {
                Some(c) => c,
                None => break,
            };

            let (eff_fee, eff_size, _) = self.ancestor_stats(&candidate);
            let feerate = eff_fee as f64 / eff_size.max(1) as f64;
            if feerate < self.config.block_min_fee_rate {
                // Step 4: terminate — nothing left can beat this ordering.
                break;
            }

            if !self.modified.contains_key(&candidate) {
                cursor += 1;
            }

            // Step 6: package = this candidate's not-yet-included ancestors, plus itself.
            let mut package = self.snapshot.unconfirmed_ancestors(&candidate, &self.in_block);
            package.insert(candidate);

            let (pkg_size, pkg_sigops, _pkg_fee) = package.iter().fold((0u64, 0u64, 0i64), |(s, so, f), t| {
                let e = &self.snapshot.entries[t];
                (s + e.size, so + e.sigop_cost, f + e.fee)
            });
            let pkg_weight = WITNESS_SCALE_FACTOR as u64 * pkg_size;

            // Step 5: weight/sigop budget test.
            if self.weight + pkg_weight > self.config.max_weight || self.sigops + pkg_sigops > self.config.max_sigops {
                self.failed.insert(candidate);
                self.modified.remove(&candidate);
                self.consecutive_failures += 1;
                let near_cap = self.config.max_weight.saturating_sub(self.weight) < NEAR_CAP_MARGIN;
                if self.consecutive_failures > MAX_CONSECUTIVE_FAILURES && near_cap {
                    break;
                }
                continue;
            }

            // Step 6: every tx in the package must be final.
            let all_final = package
                .iter()
                .all(|t| self.snapshot.entries[t].tx.is_final(self.height, self.lock_time_cutoff));
            if !all_final {
                self.failed.insert(candidate);
                self.modified.remove(&candidate);
                continue;
            }

            self.consecutive_failures = 0;

            // Step 7: topological order (ancestor count ascending), then add.
            let mut ordered: Vec<Hash256> = package.into_iter().collect();
            ordered.sort_by(|a, b| {
                let ea = &self.snapshot.entries[a];
                let eb = &self.snapshot.entries[b];
                ea.ancestor.count.cmp(&eb.ancestor.count).then_with(|| a.cmp(b))
            });

            for txid in ordered {
                if self.in_block.contains(&txid) {
                    continue;
                }
                self.add_entry(txid);
                self.relax_children(txid);
            }
        }

        (self.included, self.fees, self.sigops, self.weight)
    }
}

/// Builds a block template from the mempool's current ancestor-feerate view
/// (spec.md §4.5). `coinbase_script` is the miner's payout destination for
/// PoW blocks; ignored for PoS, whose coinbase output is always empty.
#[allow(clippy::too_many_arguments)]
pub fn assemble_block_template(
    pool: &Mempool,
    config: TemplateConfig,
    height: u32,
    lock_time_cutoff: DateTime<Utc>,
    subsidy: Amount,
    coinbase_script: Script,
    kind: BlockKind,
) -> BlockTemplate {
    let snapshot = pool.snapshot();
    let assembler = Assembler::new(snapshot, config, height, lock_time_cutoff);
    let (transactions, total_fees, total_sigops, weight_from_txs) = assembler.run();

    let coinbase = build_coinbase(height, total_fees, subsidy, coinbase_script, kind);
    let total_weight = weight_from_txs + coinbase.weight();

    debug!(
        height,
        included = transactions.len(),
        total_fees,
        total_sigops,
        total_weight,
        "block template assembled"
    );

    BlockTemplate { coinbase, transactions, total_fees, total_sigops, total_weight }
}

/// Exactly one coinbase output carrying `fees + subsidy` (PoW) or an empty
/// output (PoS — spec.md §4.5 "Coinbase construction").
fn build_coinbase(height: u32, fees: i64, subsidy: Amount, coinbase_script: Script, kind: BlockKind) -> Transaction {
    let output = match kind {
        BlockKind::ProofOfWork => TxOut { amount: fees + subsidy.units(), script_pubkey: coinbase_script },
        BlockKind::ProofOfStake => TxOut { amount: 0, script_pubkey: Script::new() },
    };

    let mut height_script = Script::new();
    height_script.push_data(&height.to_le_bytes());

    Transaction {
        version: 1,
        time: Utc::now(),
        vin: vec![TxIn { prev_out: Outpoint::coinbase([0u8; 32]), script_sig: height_script, sequence: u32::MAX }],
        vout: vec![output],
        lock_time: 0,
        witness: None,
        message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::{AncestorLimits, Mempool};
    use crate::script::make_p2pkh;
    use crate::tx::{Outpoint, TxIn, TxOut};

    fn tx_spending(parents: &[Hash256], unique: u8) -> Transaction {
        Transaction {
            version: 1,
            time: Utc::now(),
            vin: parents
                .iter()
                .map(|p| TxIn { prev_out: Outpoint { txid: *p, index: 0 }, script_sig: Script::new(), sequence: u32::MAX })
                .collect(),
            vout: vec![TxOut { amount: 1000, script_pubkey: make_p2pkh([unique; 20]) }],
            lock_time: 0,
            witness: None,
            message: None,
        }
    }

    /// S2: parent (fee 1000), an unrelated medium-fee tx (fee 10000), and a
    /// high-fee child of the parent (fee 50000) — the template must place
    /// the parent-then-child package ahead of the medium tx.
    #[test]
    fn ancestors_precede_descendants_and_beat_unrelated_medium_fee() {
        let pool = Mempool::new(AncestorLimits::default());
        let parent = tx_spending(&[[1u8; 32]], 1);
        let parent_txid = pool.add(parent, 200, 1, 1000, Utc::now(), false).unwrap();

        let medium = tx_spending(&[[2u8; 32]], 2);
        let medium_txid = pool.add(medium, 200, 1, 10_000, Utc::now(), false).unwrap();

        let child = tx_spending(&[parent_txid], 3);
        let child_txid = pool.add(child, 200, 1, 50_000, Utc::now(), false).unwrap();

        let config = TemplateConfig::default();
        let template = assemble_block_template(
            &pool,
            config,
            100,
            Utc::now(),
            Amount::new(5_000_000_000).unwrap(),
            make_p2pkh([9u8; 20]),
            BlockKind::ProofOfWork,
        );

        let parent_pos = template.transactions.iter().position(|t| *t == parent_txid).unwrap();
        let child_pos = template.transactions.iter().position(|t| *t == child_txid).unwrap();
        let medium_pos = template.transactions.iter().position(|t| *t == medium_txid).unwrap();

        assert!(parent_pos < child_pos, "parent must precede its child");
        assert!(child_pos < medium_pos, "high-fee child package should be prioritized over the medium tx");
    }

    #[test]
    fn template_respects_weight_budget() {
        let pool = Mempool::new(AncestorLimits::default());
        for i in 0..5u8 {
            let tx = tx_spending(&[[i; 32]], i + 10);
            pool.add(tx, 200, 1, 2000, Utc::now(), false).unwrap();
        }

        let mut config = TemplateConfig::default();
        // Budget for at most two transactions' worth of weight.
        config.max_weight = (WITNESS_SCALE_FACTOR as u64) * 200 * 2;

        let template = assemble_block_template(
            &pool,
            config,
            100,
            Utc::now(),
            Amount::new(5_000_000_000).unwrap(),
            make_p2pkh([9u8; 20]),
            BlockKind::ProofOfWork,
        );

        assert!(template.transactions.len() <= 2);
    }

    #[test]
    fn coinbase_carries_fees_plus_subsidy_for_pow() {
        let pool = Mempool::new(AncestorLimits::default());
        let tx = tx_spending(&[[7u8; 32]], 1);
        pool.add(tx, 200, 1, 1500, Utc::now(), false).unwrap();

        let subsidy = Amount::new(5_000_000_000).unwrap();
        let template = assemble_block_template(
            &pool,
            TemplateConfig::default(),
            1,
            Utc::now(),
            subsidy,
            make_p2pkh([1u8; 20]),
            BlockKind::ProofOfWork,
        );

        assert_eq!(template.coinbase.vout[0].amount, template.total_fees + subsidy.units());
    }

    #[test]
    fn pos_coinbase_output_is_empty() {
        let pool = Mempool::new(AncestorLimits::default());
        let template = assemble_block_template(
            &pool,
            TemplateConfig::default(),
            1,
            Utc::now(),
            Amount::ZERO,
            make_p2pkh([1u8; 20]),
            BlockKind::ProofOfStake,
        );
        assert_eq!(template.coinbase.vout[0].amount, 0);
    }
}
