//! The mempool (C4, spec.md §4.4): an indexed set of candidate transactions
//! with ancestor/descendant statistics and an ancestor-feerate ordered view.
//! The teacher has no mempool at all (its `state.rs` holds only a confirmed
//! `UTXOPool`), so this module generalizes the teacher's
//! `crossbeam`/`parking_lot` concurrency idiom to Bitcoin Core's
//! ancestor/descendant bookkeeping (spec.md §9: "Boost MultiIndex
//! ancestor_score view... rebuild as an ordered set keyed by a comparator").

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::hash::Hash256;
use crate::tx::Transaction;

pub type MempoolResult<T> = std::result::Result<T, Box<ErrorKind>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Duplicate(Hash256),
    DependencyLimit { txid: Hash256, limit: &'static str },
    NotFound(Hash256),
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Duplicate(txid) => write!(f, "txid {} already in mempool", hex::encode(txid)),
            ErrorKind::DependencyLimit { txid, limit } => {
                write!(f, "txid {} exceeds ancestor {} limit", hex::encode(txid), limit)
            }
            ErrorKind::NotFound(txid) => write!(f, "txid {} not in mempool", hex::encode(txid)),
        }
    }
}

/// Why an entry left the pool, for logging/metrics; doesn't change behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    BlockInclusion,
    Conflict,
    Eviction,
    Expiry,
}

/// Running totals over an entry and a set of related entries (ancestors or
/// descendants), spec.md §3 "Mempool entry".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregates {
    pub count: u64,
    pub size: u64,
    pub mod_fee: i64,
    pub sigops: u64,
}

impl Aggregates {
    fn add(&mut self, other: &Aggregates) {
        self.count += other.count;
        self.size += other.size;
        self.mod_fee += other.mod_fee;
        self.sigops += other.sigops;
    }

    fn sub(&mut self, other: &Aggregates) {
        self.count = self.count.saturating_sub(other.count);
        self.size = self.size.saturating_sub(other.size);
        self.mod_fee -= other.mod_fee;
        self.sigops = self.sigops.saturating_sub(other.sigops);
    }
}

#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    pub size: u64,
    pub sigop_cost: u64,
    pub fee: i64,
    pub entry_time: DateTime<Utc>,
    pub spends_coinbase: bool,
    /// Own stats, counted in both `ancestor` and `descendant` as the
    /// singleton case (spec.md §3: "an entry is its own ancestor").
    own: Aggregates,
    pub ancestor: Aggregates,
    pub descendant: Aggregates,
}

impl MempoolEntry {
    /// Ancestor feerate as `modFee/size`, compared without floating point by
    /// callers via [`AncestorScoreKey`].
    pub fn ancestor_feerate(&self) -> f64 {
        self.ancestor.mod_fee as f64 / self.ancestor.size.max(1) as f64
    }
}

/// Limits a caller may impose on [`Mempool::calculate_mempool_ancestors`] and
/// on [`Mempool::add`]'s implicit ancestor walk.
#[derive(Debug, Clone, Copy)]
pub struct AncestorLimits {
    pub max_count: u64,
    pub max_size: u64,
}

impl Default for AncestorLimits {
    fn default() -> Self {
        AncestorLimits { max_count: 25, max_size: 101_000 }
    }
}

/// Sort key for the ancestor-feerate view (spec.md §4.4): higher
/// `ancestor.modFee/size` first, tiebreak by higher `modFee`, then lower
/// `size`, then lexicographic `txid`. Implemented via cross-multiplication
/// rather than floating point so the ordering is exact and deterministic
/// (spec.md §8 property 2's determinism requirement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorScoreKey {
    pub mod_fee: i64,
    pub size: u64,
    pub txid: Hash256,
}

impl PartialOrd for AncestorScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AncestorScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.mod_fee as i128 * other.size as i128;
        let rhs = other.mod_fee as i128 * self.size as i128;
        rhs.cmp(&lhs)
            .then_with(|| other.mod_fee.cmp(&self.mod_fee))
            .then_with(|| self.size.cmp(&other.size))
            .then_with(|| self.txid.cmp(&other.txid))
    }
}

/// `aFee·bSize > bFee·aSize` (spec.md §4.5 step 2): whether `a`'s ancestor
/// feerate beats `b`'s, via cross-multiplication.
pub fn feerate_beats(a_fee: i64, a_size: u64, b_fee: i64, b_size: u64) -> bool {
    a_fee as i128 * b_size as i128 > b_fee as i128 * a_size as i128
}

/// A consistent, owned snapshot of mempool state handed to the block-template
/// assembler (C5). See [`Mempool::snapshot`].
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub entries: HashMap<Hash256, MempoolEntry>,
    pub order: Vec<Hash256>,
    pub children: HashMap<Hash256, HashSet<Hash256>>,
}

impl PoolSnapshot {
    /// Every in-pool ancestor of `txid`, transitively, computed from the
    /// snapshot's own `parents` edges reconstructed via each entry's direct
    /// inputs intersected with `entries` (kept denormalized here rather than
    /// cloning a third map, since the assembler only ever needs this once
    /// per candidate).
    pub fn unconfirmed_ancestors(&self, txid: &Hash256, exclude: &HashSet<Hash256>) -> HashSet<Hash256> {
        let mut out = HashSet::new();
        let mut frontier = vec![*txid];
        while let Some(t) = frontier.pop() {
            if let Some(entry) = self.entries.get(&t) {
                for vin in &entry.tx.vin {
                    let parent = vin.prev_out.txid;
                    if self.entries.contains_key(&parent) && !exclude.contains(&parent) && out.insert(parent) {
                        frontier.push(parent);
                    }
                }
            }
        }
        out
    }
}

struct Inner {
    by_txid: HashMap<Hash256, MempoolEntry>,
    /// Direct (one-hop) parent/child links among entries *currently in the
    /// pool* — an input's previous txid only counts as a parent if that
    /// txid is itself in the pool.
    parents: HashMap<Hash256, HashSet<Hash256>>,
    children: HashMap<Hash256, HashSet<Hash256>>,
    score_set: BTreeSet<AncestorScoreKey>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            by_txid: HashMap::new(),
            parents: HashMap::new(),
            children: HashMap::new(),
            score_set: BTreeSet::new(),
        }
    }

    fn reindex_score(&mut self, txid: &Hash256, old: Option<AncestorScoreKey>) {
        if let Some(old) = old {
            self.score_set.remove(&old);
        }
        if let Some(entry) = self.by_txid.get(txid) {
            self.score_set.insert(AncestorScoreKey {
                mod_fee: entry.ancestor.mod_fee,
                size: entry.ancestor.size,
                txid: *txid,
            });
        }
    }
}

/// The mempool itself: a single reader/writer lock guarding all mutating
/// operations (spec.md §4.4 "Concurrency": "a single reader-writer
/// discipline; all mutating operations take the pool's exclusive lock").
pub struct Mempool {
    inner: RwLock<Inner>,
    limits: AncestorLimits,
}

impl Mempool {
    pub fn new(limits: AncestorLimits) -> Self {
        Mempool { inner: RwLock::new(Inner::new()), limits }
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_txid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.inner.read().by_txid.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<MempoolEntry> {
        self.inner.read().by_txid.get(txid).cloned()
    }

    /// `Add(entry)` (spec.md §4.4): inserts an already-validated transaction,
    /// computing its ancestor aggregates by walking parents already in the
    /// pool, and bumps every such ancestor's descendant aggregates.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        tx: Transaction,
        size: u64,
        sigop_cost: u64,
        fee: i64,
        entry_time: DateTime<Utc>,
        spends_coinbase: bool,
    ) -> MempoolResult<Hash256> {
        let txid = tx.txid();
        let mut guard = self.inner.write();

        if guard.by_txid.contains_key(&txid) {
            return Err(Box::new(ErrorKind::Duplicate(txid)));
        }

        let direct_parents: HashSet<Hash256> = tx
            .vin
            .iter()
            .map(|i| i.prev_out.txid)
            .filter(|parent_txid| guard.by_txid.contains_key(parent_txid))
            .collect();

        let own = Aggregates { count: 1, size, mod_fee: fee, sigops: sigop_cost };

        // Walk the full ancestor set transitively to compute the entry's
        // ancestor aggregates (spec.md §3 invariant: sum over ancestors + self).
        let mut ancestor_txids: HashSet<Hash256> = HashSet::new();
        let mut frontier: Vec<Hash256> = direct_parents.iter().copied().collect();
        while let Some(p) = frontier.pop() {
            if ancestor_txids.insert(p) {
                if let Some(grandparents) = guard.parents.get(&p) {
                    frontier.extend(grandparents.iter().copied());
                }
            }
        }

        let mut ancestor_aggregates = own;
        for a in &ancestor_txids {
            if let Some(entry) = guard.by_txid.get(a) {
                ancestor_aggregates.add(&entry.own);
            }
        }

        if ancestor_aggregates.count > self.limits.max_count {
            return Err(Box::new(ErrorKind::DependencyLimit { txid, limit: "count" }));
        }
        if ancestor_aggregates.size > self.limits.max_size {
            return Err(Box::new(ErrorKind::DependencyLimit { txid, limit: "size" }));
        }

        let entry = MempoolEntry {
            tx,
            txid,
            size,
            sigop_cost,
            fee,
            entry_time,
            spends_coinbase,
            own,
            ancestor: ancestor_aggregates,
            descendant: own,
        };

        guard.by_txid.insert(txid, entry);
        guard.parents.insert(txid, direct_parents.clone());
        for p in &direct_parents {
            guard.children.entry(*p).or_default().insert(txid);
        }

        // Every ancestor gains this entry as a descendant.
        for a in &ancestor_txids {
            let old_key = guard.by_txid.get(a).map(|e| AncestorScoreKey {
                mod_fee: e.ancestor.mod_fee,
                size: e.ancestor.size,
                txid: *a,
            });
            if let Some(e) = guard.by_txid.get_mut(a) {
                e.descendant.add(&own);
            }
            guard.reindex_score(a, old_key);
        }

        guard.reindex_score(&txid, None);
        debug!(txid = %hex::encode(txid), ancestors = ancestor_txids.len(), "mempool entry added");
        Ok(txid)
    }

    /// `Remove(txid, reason)` (spec.md §4.4): removes a single entry and
    /// reduces every in-pool descendant's ancestor aggregates by its stats,
    /// relinking descendants directly to the removed entry's parents.
    pub fn remove(&self, txid: &Hash256, reason: RemovalReason) -> MempoolResult<()> {
        let mut guard = self.inner.write();
        self.remove_locked(&mut guard, txid, reason)
    }

    fn remove_locked(&self, guard: &mut Inner, txid: &Hash256, reason: RemovalReason) -> MempoolResult<()> {
        let entry = guard.by_txid.remove(txid).ok_or_else(|| Box::new(ErrorKind::NotFound(*txid)))?;
        let old_key = AncestorScoreKey { mod_fee: entry.ancestor.mod_fee, size: entry.ancestor.size, txid: *txid };
        guard.score_set.remove(&old_key);

        let parents = guard.parents.remove(txid).unwrap_or_default();
        let children = guard.children.remove(txid).unwrap_or_default();

        for p in &parents {
            if let Some(set) = guard.children.get_mut(p) {
                set.remove(txid);
            }
        }

        for c in &children {
            if let Some(set) = guard.parents.get_mut(c) {
                set.remove(txid);
                set.extend(parents.iter().copied());
            }
            let old_child_key = guard.by_txid.get(c).map(|e| AncestorScoreKey {
                mod_fee: e.ancestor.mod_fee,
                size: e.ancestor.size,
                txid: *c,
            });
            if let Some(child_entry) = guard.by_txid.get_mut(c) {
                child_entry.ancestor.sub(&entry.own);
            }
            guard.reindex_score(c, old_child_key);
        }

        for p in &parents {
            let old_parent_key = guard.by_txid.get(p).map(|e| AncestorScoreKey {
                mod_fee: e.ancestor.mod_fee,
                size: e.ancestor.size,
                txid: *p,
            });
            if let Some(parent_entry) = guard.by_txid.get_mut(p) {
                parent_entry.descendant.sub(&entry.own);
            }
            guard.reindex_score(p, old_parent_key);
        }

        trace!(txid = %hex::encode(txid), ?reason, "mempool entry removed");
        Ok(())
    }

    /// `RemoveRecursive(tx)` (spec.md §4.4): removes `tx` and all of its
    /// in-pool descendants.
    pub fn remove_recursive(&self, txid: &Hash256, reason: RemovalReason) -> MempoolResult<()> {
        let mut guard = self.inner.write();
        let mut out = HashSet::new();
        Self::collect_descendants_locked(&guard, txid, &mut out);
        out.insert(*txid);

        // Remove leaves first (descendants before ancestors) so the
        // parent/child bookkeeping in `remove_locked` stays simple.
        let mut ordered: Vec<Hash256> = out.into_iter().collect();
        ordered.sort_by_key(|t| std::cmp::Reverse(guard.by_txid.get(t).map(|e| e.ancestor.count).unwrap_or(0)));
        for t in ordered {
            if guard.by_txid.contains_key(&t) {
                self.remove_locked(&mut guard, &t, reason)?;
            }
        }
        Ok(())
    }

    /// `CalculateDescendants` (spec.md §4.4): populates `out` with every
    /// entry reachable under the "children" relation, transitively.
    pub fn calculate_descendants(&self, txid: &Hash256, out: &mut HashSet<Hash256>) {
        let guard = self.inner.read();
        Self::collect_descendants_locked(&guard, txid, out);
    }

    fn collect_descendants_locked(guard: &Inner, txid: &Hash256, out: &mut HashSet<Hash256>) {
        let mut frontier = vec![*txid];
        while let Some(t) = frontier.pop() {
            if let Some(children) = guard.children.get(&t) {
                for c in children {
                    if out.insert(*c) {
                        frontier.push(*c);
                    }
                }
            }
        }
    }

    /// `CalculateMemPoolAncestors` (spec.md §4.4): populates `out` with every
    /// entry reachable under "parents", honoring `limits`.
    pub fn calculate_mempool_ancestors(
        &self,
        txid: &Hash256,
        out: &mut HashSet<Hash256>,
        limits: AncestorLimits,
    ) -> MempoolResult<()> {
        let guard = self.inner.read();
        let mut frontier = vec![*txid];
        let mut total_size = 0u64;
        while let Some(t) = frontier.pop() {
            if let Some(parents) = guard.parents.get(&t) {
                for p in parents {
                    if out.insert(*p) {
                        total_size += guard.by_txid.get(p).map(|e| e.size).unwrap_or(0);
                        if out.len() as u64 > limits.max_count {
                            return Err(Box::new(ErrorKind::DependencyLimit { txid: *txid, limit: "count" }));
                        }
                        if total_size > limits.max_size {
                            return Err(Box::new(ErrorKind::DependencyLimit { txid: *txid, limit: "size" }));
                        }
                        frontier.push(*p);
                    }
                }
            }
        }
        Ok(())
    }

    /// The ancestor-feerate ordered view (spec.md §4.4 `Project<ancestor_score>`),
    /// best (highest feerate) first.
    pub fn ancestor_score_order(&self) -> Vec<Hash256> {
        self.inner.read().score_set.iter().map(|k| k.txid).collect()
    }

    /// A consistent read-only snapshot for the block-template assembler
    /// (C5). Cloning under the lock is what spec.md §5 means by "the
    /// assembler's view of `ancestor_score` is consistent for the full
    /// duration of a template build" — the assembler works from this owned
    /// copy rather than re-reading the live pool mid-build.
    pub fn snapshot(&self) -> PoolSnapshot {
        let guard = self.inner.read();
        PoolSnapshot {
            entries: guard.by_txid.clone(),
            order: guard.score_set.iter().map(|k| k.txid).collect(),
            children: guard.children.clone(),
        }
    }

    /// Sweeps entries older than `now - expiry` (SPEC_FULL.md §4 supplement).
    pub fn expire_old(&self, now: DateTime<Utc>, expiry: chrono::Duration) -> Vec<Hash256> {
        let cutoff = now - expiry;
        let stale: Vec<Hash256> = {
            let guard = self.inner.read();
            guard
                .by_txid
                .values()
                .filter(|e| e.entry_time < cutoff)
                .map(|e| e.txid)
                .collect()
        };
        for txid in &stale {
            let _ = self.remove_recursive(txid, RemovalReason::Expiry);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::make_p2pkh;
    use crate::tx::{Outpoint, TxIn, TxOut};

    fn tx_spending(parents: &[Hash256], unique: u8) -> Transaction {
        Transaction {
            version: 1,
            time: Utc::now(),
            vin: parents
                .iter()
                .map(|p| TxIn { prev_out: Outpoint { txid: *p, index: 0 }, script_sig: crate::script::Script::new(), sequence: u32::MAX })
                .collect(),
            vout: vec![TxOut { amount: 1000, script_pubkey: make_p2pkh([unique; 20]) }],
            lock_time: 0,
            witness: None,
            message: None,
        }
    }

    #[test]
    fn ancestor_aggregates_sum_over_chain() {
        let pool = Mempool::new(AncestorLimits::default());
        let parent = tx_spending(&[[0u8; 32]], 1);
        let parent_txid = pool.add(parent, 200, 1, 1000, Utc::now(), false).unwrap();

        let child = tx_spending(&[parent_txid], 2);
        let child_txid = pool.add(child, 250, 1, 5000, Utc::now(), false).unwrap();

        let child_entry = pool.get(&child_txid).unwrap();
        assert_eq!(child_entry.ancestor.count, 2);
        assert_eq!(child_entry.ancestor.size, 450);
        assert_eq!(child_entry.ancestor.mod_fee, 6000);

        let parent_entry = pool.get(&parent_txid).unwrap();
        assert_eq!(parent_entry.descendant.count, 2);
    }

    #[test]
    fn duplicate_txid_is_rejected() {
        let pool = Mempool::new(AncestorLimits::default());
        let tx = tx_spending(&[[9u8; 32]], 1);
        pool.add(tx.clone(), 200, 1, 1000, Utc::now(), false).unwrap();
        let err = pool.add(tx, 200, 1, 1000, Utc::now(), false).unwrap_err();
        assert!(matches!(*err, ErrorKind::Duplicate(_)));
    }

    /// S2: parent fee 1000, independent medium-fee tx 10000, child of parent
    /// with fee 50000 — the child's ancestor feerate should rank above the
    /// medium tx's own (unparented) feerate when sizes are comparable.
    #[test]
    fn ancestor_score_ranks_fee_bearing_child_above_unrelated_medium_tx() {
        let pool = Mempool::new(AncestorLimits::default());
        let parent = tx_spending(&[[1u8; 32]], 1);
        let parent_txid = pool.add(parent, 200, 1, 1000, Utc::now(), false).unwrap();

        let medium = tx_spending(&[[2u8; 32]], 2);
        pool.add(medium, 200, 1, 10_000, Utc::now(), false).unwrap();

        let child = tx_spending(&[parent_txid], 3);
        let child_txid = pool.add(child, 200, 1, 50_000, Utc::now(), false).unwrap();

        let order = pool.ancestor_score_order();
        let child_rank = order.iter().position(|t| *t == child_txid).unwrap();
        let parent_rank = order.iter().position(|t| *t == parent_txid).unwrap();
        assert!(child_rank < parent_rank, "higher-feerate child package should sort first");
    }

    #[test]
    fn remove_recursive_drops_descendants_too() {
        let pool = Mempool::new(AncestorLimits::default());
        let parent = tx_spending(&[[3u8; 32]], 1);
        let parent_txid = pool.add(parent, 200, 1, 1000, Utc::now(), false).unwrap();
        let child = tx_spending(&[parent_txid], 2);
        let child_txid = pool.add(child, 200, 1, 1000, Utc::now(), false).unwrap();

        pool.remove_recursive(&parent_txid, RemovalReason::Conflict).unwrap();
        assert!(!pool.contains(&parent_txid));
        assert!(!pool.contains(&child_txid));
    }

    #[test]
    fn calculate_descendants_follows_children_transitively() {
        let pool = Mempool::new(AncestorLimits::default());
        let a = tx_spending(&[[4u8; 32]], 1);
        let a_txid = pool.add(a, 200, 1, 1000, Utc::now(), false).unwrap();
        let b = tx_spending(&[a_txid], 2);
        let b_txid = pool.add(b, 200, 1, 1000, Utc::now(), false).unwrap();
        let c = tx_spending(&[b_txid], 3);
        let c_txid = pool.add(c, 200, 1, 1000, Utc::now(), false).unwrap();

        let mut out = HashSet::new();
        pool.calculate_descendants(&a_txid, &mut out);
        assert_eq!(out, HashSet::from([b_txid, c_txid]));
    }
}
